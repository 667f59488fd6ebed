//! Operator API data transfer objects

use crate::domain::endpoint::{EndpointSnapshot, RegistrationState};
use serde::{Deserialize, Serialize};

/// Generic API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Outbound call request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceCallRequest {
    pub to: String,
    pub from: String,
}

/// Call sessions list response
#[derive(Debug, Serialize, Deserialize)]
pub struct CallListResponse<T> {
    pub calls: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pipeline: &'static str,
    pub endpoint: Option<EndpointSnapshot>,
    pub registration: RegistrationState,
    pub sessions: usize,
}
