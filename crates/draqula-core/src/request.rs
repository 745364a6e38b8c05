//! GraphQL request types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SerializationError;

/// A GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only, cacheable).
    #[default]
    Query,
    /// A mutation operation (never cached or deduplicated).
    Mutation,
}

/// A GraphQL request as handed to a [`Transport`](crate::Transport).
///
/// Serializes to the standard GraphQL-over-HTTP JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLRequest {
    /// The GraphQL document.
    pub query: String,

    /// Optional variables for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Optional operation name (for documents with multiple operations).
    #[serde(skip_serializing_if = "Option::is_none", rename = "operationName")]
    pub operation_name: Option<String>,

    /// Extensions (implementation-specific metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,

    #[serde(skip)]
    pub(crate) operation_type: OperationType,
}

impl GraphQLRequest {
    /// Create a new query request.
    ///
    /// # Example
    ///
    /// ```
    /// use draqula_core::GraphQLRequest;
    ///
    /// let request = GraphQLRequest::query("query GetUser($id: ID!) { user(id: $id) { name } }")
    ///     .variable("id", 1)
    ///     .unwrap();
    /// assert_eq!(request.variables.unwrap()["id"], 1);
    /// ```
    pub fn query(document: impl Into<String>) -> Self {
        Self::with_type(document, OperationType::Query)
    }

    /// Create a new mutation request.
    pub fn mutation(document: impl Into<String>) -> Self {
        Self::with_type(document, OperationType::Mutation)
    }

    /// Create a request, inferring the operation type from the document.
    pub fn new(document: impl Into<String>) -> Self {
        let document = document.into();
        let operation_type = Self::infer_operation_type(&document);
        Self::with_type(document, operation_type)
    }

    fn with_type(document: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            query: document.into(),
            variables: None,
            operation_name: None,
            extensions: None,
            operation_type,
        }
    }

    /// Set a single variable.
    ///
    /// Fails if the value cannot be represented as JSON.
    pub fn variable(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, SerializationError> {
        let value = serde_json::to_value(value)?;
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Map::new()));
        match variables {
            Value::Object(map) => {
                map.insert(name.into(), value);
            }
            other => {
                return Err(SerializationError::new(format!(
                    "variables must be an object, got {other}"
                )));
            }
        }
        Ok(self)
    }

    /// Replace all variables with a serializable value.
    ///
    /// The value must serialize to a JSON object or `null`.
    pub fn variables(mut self, variables: impl Serialize) -> Result<Self, SerializationError> {
        self.variables = match serde_json::to_value(variables)? {
            Value::Null => None,
            value @ Value::Object(_) => Some(value),
            other => {
                return Err(SerializationError::new(format!(
                    "variables must be an object, got {other}"
                )));
            }
        };
        Ok(self)
    }

    /// Set the operation name.
    ///
    /// Required when the document contains multiple operations.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set extensions (implementation-specific metadata).
    pub fn extensions(mut self, extensions: impl Serialize) -> Result<Self, SerializationError> {
        self.extensions = Some(serde_json::to_value(extensions)?);
        Ok(self)
    }

    /// Get the operation type.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Check if this is a mutation.
    pub fn is_mutation(&self) -> bool {
        self.operation_type == OperationType::Mutation
    }

    fn infer_operation_type(document: &str) -> OperationType {
        let trimmed = document.trim_start();
        if trimmed.starts_with("mutation") {
            OperationType::Mutation
        } else {
            OperationType::Query
        }
    }
}
