//! A controllable in-memory provider for tests.
//!
//! Enabled with the `test-support` feature.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::pending::{pending, Pending};
use crate::provider::Provider;
use crate::query::PropertyAccessQuery;
use crate::response::{
    AcquiredPropertyData, FieldMap, Header, PropertyAccessError, PropertyAccessResponse,
    PropertyUpdateResponse, UpdateHeader,
};
use crate::stream::{BroadcastStream, PropertyStream, StreamUpdate};

/// Provider backed by in-memory values with scriptable timing and failures.
///
/// Every `create_property_stream` call hands out a fresh [`BroadcastStream`]
/// which the test can feed through [`ScriptedProvider::emit`]. Sets are stored
/// and returned by later gets.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    values: Mutex<HashMap<PropertyAccessQuery, FieldMap>>,
    failures: Mutex<HashMap<PropertyAccessQuery, String>>,
    delay: Mutex<Option<Duration>>,
    streams: Mutex<Vec<(PropertyAccessQuery, Arc<BroadcastStream>)>>,
    get_calls: Mutex<Vec<PropertyAccessQuery>>,
    set_calls: Mutex<Vec<(PropertyAccessQuery, FieldMap)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve gets and sets from a background thread after `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Store the value returned by gets for `query`.
    ///
    /// Non-object values are stored as an empty field map.
    pub fn insert_value(&self, query: PropertyAccessQuery, value: Value) {
        let fields = AcquiredPropertyData::from_json(value).fields;
        self.values.lock().insert(query, fields);
    }

    /// Make every get and set for `query` fail with `message`.
    pub fn fail_with(&self, query: PropertyAccessQuery, message: impl Into<String>) {
        self.failures.lock().insert(query, message.into());
    }

    pub fn value(&self, query: &PropertyAccessQuery) -> Option<FieldMap> {
        self.values.lock().get(query).cloned()
    }

    pub fn get_calls(&self) -> Vec<PropertyAccessQuery> {
        self.get_calls.lock().clone()
    }

    pub fn set_calls(&self) -> Vec<(PropertyAccessQuery, FieldMap)> {
        self.set_calls.lock().clone()
    }

    /// Streams handed out so far for `query`, oldest first.
    pub fn streams_for(&self, query: &PropertyAccessQuery) -> Vec<Arc<BroadcastStream>> {
        self.streams
            .lock()
            .iter()
            .filter(|(q, _)| q == query)
            .map(|(_, stream)| Arc::clone(stream))
            .collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Deliver a successful update carrying `value` on every stream created
    /// for `query`. Returns the number of streams delivered to.
    pub fn emit(&self, query: &PropertyAccessQuery, value: Value) -> usize {
        let response = PropertyAccessResponse::success(
            query.clone(),
            AcquiredPropertyData::new(now_header(), AcquiredPropertyData::from_json(value).fields),
        );
        self.emit_response(query, Arc::new(response))
    }

    /// Deliver an access error on every stream created for `query`.
    pub fn emit_error(&self, query: &PropertyAccessQuery, message: impl Into<String>) -> usize {
        let response =
            PropertyAccessResponse::failure(query.clone(), PropertyAccessError::new(message));
        self.emit_response(query, Arc::new(response))
    }

    fn emit_response(&self, query: &PropertyAccessQuery, update: StreamUpdate) -> usize {
        let streams = self.streams_for(query);
        for stream in &streams {
            stream.deliver(Arc::clone(&update));
        }
        streams.len()
    }

    fn resolve<T: Send + 'static>(&self, result: T) -> Pending<T> {
        let Some(delay) = *self.delay.lock() else {
            return Pending::ready(result);
        };
        let (completer, pending) = pending();
        thread::spawn(move || {
            thread::sleep(delay);
            completer.complete(result);
        });
        pending
    }
}

fn now_header() -> Header {
    Header {
        acquisition_timestamp: chrono::Utc::now().timestamp_nanos_opt(),
        ..Header::default()
    }
}

impl Provider for ScriptedProvider {
    fn get_property(&self, query: &PropertyAccessQuery) -> Pending<PropertyAccessResponse> {
        self.get_calls.lock().push(query.clone());

        let response = if let Some(message) = self.failures.lock().get(query) {
            PropertyAccessResponse::failure(query.clone(), PropertyAccessError::new(message.clone()))
        } else if let Some(fields) = self.values.lock().get(query) {
            PropertyAccessResponse::success(
                query.clone(),
                AcquiredPropertyData::new(now_header(), fields.clone()),
            )
        } else {
            PropertyAccessResponse::failure(
                query.clone(),
                PropertyAccessError::new(format!("No value available for {}", query)),
            )
        };
        self.resolve(response)
    }

    fn set_property(
        &self,
        query: &PropertyAccessQuery,
        value: FieldMap,
    ) -> Pending<PropertyUpdateResponse> {
        self.set_calls.lock().push((query.clone(), value.clone()));

        let response = if let Some(message) = self.failures.lock().get(query) {
            PropertyUpdateResponse::failure(query.clone(), PropertyAccessError::new(message.clone()))
        } else {
            self.values.lock().insert(query.clone(), value);
            PropertyUpdateResponse::success(query.clone(), UpdateHeader::new(query.selector()))
        };
        self.resolve(response)
    }

    fn create_property_stream(&self, query: &PropertyAccessQuery) -> Arc<dyn PropertyStream> {
        let stream = Arc::new(BroadcastStream::new());
        self.streams
            .lock()
            .push((query.clone(), Arc::clone(&stream)));
        stream
    }
}
