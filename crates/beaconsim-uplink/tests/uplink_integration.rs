use beaconsim_core::{
    BeaconReading, DeviceConfigurator, DeviceDirective, EmitError, LedBehavior, ScannerReport,
    TelemetrySink,
};
use beaconsim_uplink::{UplinkConfig, UplinkPipeline};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Minimal single-request HTTP stub: accepts one connection, parses the
/// request line, headers, and body, replies 200, and reports what it saw.
fn spawn_stub_server(delay: Duration) -> (String, mpsc::Receiver<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            thread::sleep(delay);
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 1024];
            let (path, body) = loop {
                let read = match stream.read(&mut chunk) {
                    Ok(0) => break parse_request(&buffer),
                    Ok(n) => n,
                    Err(_) => break parse_request(&buffer),
                };
                buffer.extend_from_slice(&chunk[..read]);
                if let Some((path, Some(body))) = try_parse(&buffer) {
                    break (path, body);
                }
            };
            let reply = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 15\r\nConnection: close\r\n\r\n{\"status\":\"ok\"}";
            let _ = stream.write_all(reply.as_bytes());
            let _ = tx.send((path, body));
        }
    });
    (format!("http://{addr}"), rx)
}

fn parse_request(buffer: &[u8]) -> (String, String) {
    match try_parse(buffer) {
        Some((path, body)) => (path, body.unwrap_or_default()),
        None => (String::new(), String::new()),
    }
}

/// Returns `Some((path, Some(body)))` once the declared body is complete.
fn try_parse(buffer: &[u8]) -> Option<(String, Option<String>)> {
    let text = String::from_utf8_lossy(buffer);
    let header_end = text.find("\r\n\r\n")?;
    let head = &text[..header_end];
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();
    let content_length: usize = head
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    let body = &text[header_end + 4..];
    if body.len() >= content_length {
        Some((path, Some(body[..content_length].to_string())))
    } else {
        Some((path, None))
    }
}

fn sample_report() -> ScannerReport {
    ScannerReport {
        agent_id: "scanner-A".to_string(),
        movement: 4.2,
        beacons: BTreeMap::from([(
            "beacon-NE".to_string(),
            BeaconReading {
                signal: -55,
                beacon_name: "NE".to_string(),
            },
        )]),
    }
}

#[test]
fn telemetry_reports_post_to_the_data_endpoint() {
    let (base_url, seen) = spawn_stub_server(Duration::ZERO);
    let pipeline = UplinkPipeline::connect(UplinkConfig::new(base_url)).expect("pipeline");
    let mut sink = pipeline.telemetry_sink();

    sink.emit(&sample_report()).expect("enqueue");

    let (path, body) = seen
        .recv_timeout(Duration::from_secs(5))
        .expect("stub server saw the request");
    assert_eq!(path, "/data");
    let value: serde_json::Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(value["agentId"], "scanner-A");
    assert_eq!(value["beacons"]["beacon-NE"]["signal"], -55);
    assert_eq!(value["beacons"]["beacon-NE"]["beaconName"], "NE");
}

#[test]
fn device_directives_post_to_the_configure_endpoint() {
    let (base_url, seen) = spawn_stub_server(Duration::ZERO);
    let pipeline = UplinkPipeline::connect(UplinkConfig::new(base_url)).expect("pipeline");
    let mut relay = pipeline.device_configurator();

    relay.configure(
        "scanner-B",
        &DeviceDirective {
            led: Some(LedBehavior::HeartBeat {
                color: "#FF0000".to_string(),
                period: 800,
            }),
            vibration: None,
        },
    );

    let (path, body) = seen
        .recv_timeout(Duration::from_secs(5))
        .expect("stub server saw the request");
    assert_eq!(path, "/configure/scanner-B");
    let value: serde_json::Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(value["led_behavior"]["type"], "HeartBeat");
    assert_eq!(value["led_behavior"]["params"]["color"], "#FF0000");
    assert_eq!(value["led_behavior"]["params"]["period"], 800);
}

#[test]
fn overflowing_the_queue_drops_reports_without_blocking() {
    // Server stalls before reading so the worker stays busy on one request.
    let (base_url, _seen) = spawn_stub_server(Duration::from_millis(500));
    let config = UplinkConfig {
        base_url,
        queue_capacity: 1,
        request_timeout: Duration::from_secs(1),
    };
    let pipeline = UplinkPipeline::connect(config).expect("pipeline");
    let mut sink = pipeline.telemetry_sink();

    let mut rejected = 0;
    for _ in 0..10 {
        if matches!(sink.emit(&sample_report()), Err(EmitError::QueueFull)) {
            rejected += 1;
        }
    }

    assert!(rejected > 0, "a stalled worker must surface queue overflow");
    assert!(pipeline.dropped_jobs() > 0);
    drop(sink);
}
