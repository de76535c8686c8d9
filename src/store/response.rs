//! Replica response

use super::headers::{header_names, Headers};

/// Raw successful (or replica-level non-error) response.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl StoreResponse {
    pub fn new(status: u16, headers: Headers) -> Self {
        Self {
            status,
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn lsn(&self) -> i64 {
        self.headers.get_i64(header_names::LSN).unwrap_or(-1)
    }

    pub fn sub_status(&self) -> u32 {
        self.headers.get_u32(header_names::SUB_STATUS).unwrap_or(0)
    }

    pub fn session_token(&self) -> Option<&str> {
        self.headers.get(header_names::SESSION_TOKEN)
    }

    pub fn request_charge(&self) -> f64 {
        self.headers.get_f64(header_names::REQUEST_CHARGE).unwrap_or(0.0)
    }
}
