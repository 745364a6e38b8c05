//! GraphQL response types.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{DraqulaError, GraphQLError, NetworkError, ResponseError};

/// A GraphQL response from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// The data returned by the operation.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors that occurred during execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ResponseError>,

    /// Additional response metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    /// A successful response carrying `data`.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// A response carrying only errors.
    pub fn from_errors(errors: Vec<ResponseError>) -> Self {
        Self {
            errors,
            ..Default::default()
        }
    }

    /// Check if the response contains errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Check if the response was successful (has data and no errors).
    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.errors.is_empty()
    }

    /// Collapse the response into data or a single error.
    ///
    /// Any reported error wins over partial data, so a settled result never
    /// carries both.
    pub fn into_result(self) -> Result<Value, DraqulaError> {
        if !self.errors.is_empty() {
            return Err(GraphQLError::new(self.errors).into());
        }
        self.data.ok_or_else(|| {
            NetworkError::InvalidBody("No data in GraphQL response".into()).into()
        })
    }

    /// Parse the data as a specific type.
    pub fn data<T: DeserializeOwned>(self) -> Result<T, DraqulaError> {
        let data = self.into_result()?;
        serde_json::from_value(data).map_err(|e| {
            NetworkError::Json(format!("Failed to deserialize GraphQL response: {e}")).into()
        })
    }
}
