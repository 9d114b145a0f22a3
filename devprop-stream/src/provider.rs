//! The boundary between clients and device-access backends.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, StreamError};
use crate::pending::Pending;
use crate::query::PropertyAccessQuery;
use crate::response::{FieldMap, PropertyAccessResponse, PropertyUpdateResponse};
use crate::stream::PropertyStream;

/// A source of property data.
///
/// Providers may resolve results and deliver stream updates from any thread,
/// including threads they own. Access failures are reported inside the
/// responses rather than as errors.
pub trait Provider: Send + Sync {
    /// Start acquiring a single value for `query`.
    fn get_property(&self, query: &PropertyAccessQuery) -> Pending<PropertyAccessResponse>;

    /// Start writing `value` for `query`.
    fn set_property(
        &self,
        query: &PropertyAccessQuery,
        value: FieldMap,
    ) -> Pending<PropertyUpdateResponse>;

    /// Create the root stream a new subscription to `query` will attach to.
    ///
    /// Called once per subscription. Implementations may share one data
    /// source between the streams they hand out.
    fn create_property_stream(&self, query: &PropertyAccessQuery) -> Arc<dyn PropertyStream>;

    /// Convert a caller-supplied value into the field map handed to
    /// [`Provider::set_property`].
    ///
    /// The default accepts JSON objects only.
    fn prepare_value_for_set(&self, query: &PropertyAccessQuery, value: Value) -> Result<FieldMap> {
        match value {
            Value::Object(fields) => Ok(fields),
            other => Err(StreamError::InvalidValue(format!(
                "{} expects an object, got {}",
                query, other
            ))),
        }
    }
}
