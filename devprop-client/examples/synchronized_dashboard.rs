//! Synchronized Dashboard - two properties released together per cycle
//!
//! This example shows:
//! - A small provider whose streams are fed by a background "device" thread
//! - The synchronizer middleware aligning two properties into rounds
//! - Merged blocking consumption through the client's subscription pool
//!
//! Run with: DEVPROP_LOG_MODE=development cargo run -p devprop-sdk-client --example synchronized_dashboard

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use devprop_client::logging;
use devprop_client::{
    AcquiredPropertyData, BlockingClient, ClientConfig, Pending, PropertyAccessError,
    PropertyAccessQuery, PropertyAccessResponse, PropertyStream, PropertyUpdateResponse, Provider,
    SynchronizerMiddleware, UpdateHeader,
};
use devprop_stream::{BroadcastStream, FieldMap};

/// A pretend accelerator: every property ticks on its own period.
#[derive(Default)]
struct SimulatedDevice {
    streams: Mutex<Vec<(PropertyAccessQuery, Weak<BroadcastStream>)>>,
    settings: Mutex<HashMap<PropertyAccessQuery, FieldMap>>,
}

impl SimulatedDevice {
    fn run(self: &Arc<Self>, cycles: u64) -> thread::JoinHandle<()> {
        let device = Arc::clone(self);
        thread::spawn(move || {
            for cycle in 0..cycles {
                thread::sleep(Duration::from_millis(100));
                // BPM ticks every cycle, BCT only on even cycles.
                device.publish("BPM", cycle, json!({ "intensity": 100 + cycle }));
                if cycle % 2 == 0 {
                    device.publish("BCT", cycle, json!({ "current": 2.0 + cycle as f64 / 10.0 }));
                }
            }
        })
    }

    fn publish(&self, property: &str, cycle: u64, value: serde_json::Value) {
        let mut streams = self.streams.lock();
        streams.retain(|(_, stream)| stream.strong_count() > 0);
        for (query, stream) in streams.iter() {
            let Some(stream) = stream.upgrade() else {
                continue;
            };
            if query.property() != property {
                continue;
            }
            let mut data = AcquiredPropertyData::from_json(value.clone());
            data.header.cycle_timestamp = Some(cycle as i64 * 100_000_000);
            stream.deliver(Arc::new(PropertyAccessResponse::success(query.clone(), data)));
        }
    }
}

impl Provider for SimulatedDevice {
    fn get_property(&self, query: &PropertyAccessQuery) -> Pending<PropertyAccessResponse> {
        let response = match self.settings.lock().get(query) {
            Some(fields) => PropertyAccessResponse::success(query.clone(), fields.clone().into()),
            None => PropertyAccessResponse::failure(
                query.clone(),
                PropertyAccessError::new("property has never been set"),
            ),
        };
        Pending::ready(response)
    }

    fn set_property(
        &self,
        query: &PropertyAccessQuery,
        value: FieldMap,
    ) -> Pending<PropertyUpdateResponse> {
        self.settings.lock().insert(query.clone(), value);
        Pending::ready(PropertyUpdateResponse::success(
            query.clone(),
            UpdateHeader::new(query.selector()),
        ))
    }

    fn create_property_stream(&self, query: &PropertyAccessQuery) -> Arc<dyn PropertyStream> {
        let stream = Arc::new(BroadcastStream::new());
        self.streams
            .lock()
            .push((query.clone(), Arc::downgrade(&stream)));
        stream
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    logging::init_logging_from_env()?;

    println!("=== devprop Synchronized Dashboard ===\n");

    let device = Arc::new(SimulatedDevice::default());
    let config = ClientConfig::new().with_middleware(SynchronizerMiddleware::new());
    let client = BlockingClient::with_config(Arc::clone(&device) as Arc<dyn Provider>, config)?;

    let updated = client.set("LINAC", "BPM", "", json!({ "gain": 3 }))?;
    println!("Set BPM gain: {}", updated);
    println!("Read back: {}\n", client.get("LINAC", "BPM", "")?);

    let bpm = client.subscribe("LINAC", "BPM", "");
    let bct = client.subscribe("LINAC", "BCT", "");
    bpm.start();
    bct.start();

    let ticker = device.run(8);
    {
        let pool = client.subscriptions().enable();
        for update in pool.timeout_iter(Duration::from_millis(500)) {
            let cycle = update
                .value()
                .ok()
                .and_then(|v| v.header.cycle_time())
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("[{}] {}", cycle, update.value().map(|v| v.to_string()).unwrap_or_default());
        }
    }
    ticker.join().map_err(|_| "device thread panicked")?;

    bpm.stop()?;
    bct.stop()?;
    println!("\nDone.");
    Ok(())
}
