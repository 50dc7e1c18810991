//! Request parameters and response payloads for the UCloud API actions the
//! driver uses.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::Credentials;
use crate::remote::RemoteError;

use super::signature::sign;

/// Return codes UCloud uses for a bad public key or signature.
const AUTH_RET_CODES: [i64; 2] = [171, 172];

/// Parameters for a single API action.
#[derive(Clone, Debug)]
pub(super) struct Params {
    action: &'static str,
    values: BTreeMap<String, String>,
}

impl Params {
    pub(super) fn new(action: &'static str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(String::from("Action"), action.to_owned());
        Self { action, values }
    }

    pub(super) const fn action(&self) -> &'static str {
        self.action
    }

    #[must_use]
    pub(super) fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    /// Adds the public key and the signature computed over everything else.
    pub(super) fn signed(self, credentials: &Credentials) -> BTreeMap<String, String> {
        let mut values = self.values;
        values.insert(String::from("PublicKey"), credentials.public_key.clone());
        let signature = sign(&values, credentials.private_key.expose());
        values.insert(String::from("Signature"), signature);
        values
    }

    #[cfg(test)]
    pub(super) fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "RetCode")]
    ret_code: i64,
    #[serde(rename = "Message", default)]
    message: String,
}

/// Decodes a response body, turning a non-zero `RetCode` into an error.
pub(super) fn parse_response<T: DeserializeOwned>(
    action: &str,
    body: Value,
) -> Result<T, RemoteError> {
    let envelope: Envelope =
        serde_json::from_value(body.clone()).map_err(|err| unreadable(action, &err))?;
    if envelope.ret_code != 0 {
        return Err(classify(envelope.ret_code, envelope.message));
    }
    serde_json::from_value(body).map_err(|err| unreadable(action, &err))
}

fn unreadable(action: &str, err: &serde_json::Error) -> RemoteError {
    RemoteError::Network {
        message: format!("unreadable {action} response: {err}"),
    }
}

/// Maps a UCloud return code and message onto [`RemoteError`].
pub(super) fn classify(code: i64, message: String) -> RemoteError {
    if AUTH_RET_CODES.contains(&code) {
        return RemoteError::Authentication { message };
    }
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("not exist") || lowered.contains("not found") {
        return RemoteError::NotFound { resource: message };
    }
    RemoteError::Rejected { code, message }
}

/// Body without an action-specific payload.
#[derive(Debug, Deserialize)]
pub(super) struct Empty {}

#[derive(Debug, Deserialize)]
pub(super) struct CreateUHostInstanceResponse {
    #[serde(rename = "UHostIds", default)]
    pub(super) uhost_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DescribeUHostInstanceResponse {
    #[serde(rename = "UHostSet", default)]
    pub(super) uhost_set: Vec<UHostInstance>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UHostInstance {
    #[serde(rename = "State", default)]
    pub(super) state: String,
    #[serde(rename = "IPSet", default)]
    pub(super) ip_set: Vec<UHostIp>,
}

impl UHostInstance {
    /// Returns the first address of the given type, such as `Private` or
    /// `Bgp`.
    pub(super) fn address(&self, kind: &str) -> Option<String> {
        self.ip_set
            .iter()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.ip.clone())
    }

    /// Returns the first address that is not private.
    pub(super) fn public_address(&self) -> Option<String> {
        self.ip_set
            .iter()
            .find(|entry| entry.kind != PRIVATE_IP_TYPE)
            .map(|entry| entry.ip.clone())
    }
}

/// `Type` of the private entry in an instance's `IPSet`.
pub(super) const PRIVATE_IP_TYPE: &str = "Private";

#[derive(Debug, Deserialize)]
pub(super) struct UHostIp {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "IP", default)]
    ip: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct DescribeSecurityGroupResponse {
    #[serde(rename = "DataSet", default)]
    pub(super) data_set: Vec<SecurityGroup>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SecurityGroup {
    #[serde(rename = "GroupId")]
    pub(super) group_id: u64,
    #[serde(rename = "GroupName", default)]
    pub(super) group_name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct AllocateEipResponse {
    #[serde(rename = "EIPSet", default)]
    pub(super) eip_set: Vec<Eip>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Eip {
    #[serde(rename = "EIPId")]
    pub(super) eip_id: String,
    #[serde(rename = "EIPAddr", default)]
    pub(super) addresses: Vec<EipAddress>,
}

#[derive(Debug, Deserialize)]
pub(super) struct EipAddress {
    #[serde(rename = "IP")]
    pub(super) ip: String,
}
