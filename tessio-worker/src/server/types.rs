use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AckResponse {
    pub(crate) ok: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeactivateQuery {
    pub(crate) ids: String,
    pub(crate) new_location: i64,
    #[serde(default)]
    pub(crate) send_data: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PartnerQuery {
    pub(crate) partner_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrchestratorQuery {
    pub(crate) ip_address: String,
    pub(crate) port: u16,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterQuery {
    pub(crate) port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterResponse {
    pub(crate) server_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReserveRequest {
    pub(crate) ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReserveResponse {
    pub(crate) transaction_id: String,
    pub(crate) reserved: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RejectedResponse {
    pub(crate) error: String,
    pub(crate) unavailable: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentRequest {
    pub(crate) transaction_id: String,
    pub(crate) credit_card_number: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateResponse {
    pub(crate) updated: usize,
}
