//! [`TelemetryServer`] – read-only socket reporting device state.
//!
//! Listens on `0.0.0.0:9000` next to the command server.  A client sends one
//! query per line and gets one line back:
//!
//! | Query | Reply |
//! |---|---|
//! | `ports` | `ports analog=A1 digital=D1 power=M1,M2 servo=S1 encoders=E1 pwm=C1` |
//! | `sensor <port>` | `sensor <port> <value>` |
//! | `motor <port>` | `motor <port> <power>` |
//! | `encoder <port>` | `encoder <port> <count>` |
//! | `pwm <port>` | `pwm <port> <frequency> <duty>` |
//! | `battery` | `battery <volts>` |
//! | `accelerometer`, `gyroscope` | `<query> <x> <y> <z>` |
//! | `line` | `line <x> <crossroad> <mass>` |
//!
//! Absent devices and unknown queries are answered with `error: <reason>`.

use std::net::SocketAddr;
use std::sync::Arc;

use brick_hal::Brick;
use brick_types::{BrickError, MotorType, SensorType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Default TCP port of the telemetry socket.
pub const DEFAULT_TELEMETRY_PORT: u16 = 9000;

pub struct TelemetryServer {
    brick: Arc<Brick>,
    port: u16,
}

impl TelemetryServer {
    pub fn new(brick: Arc<Brick>) -> Self {
        Self {
            brick,
            port: DEFAULT_TELEMETRY_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bind the configured port and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Io`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), BrickError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BrickError::io(addr, e))?;
        self.serve(listener).await
    }

    /// Answer queries on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BrickError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "telemetry server listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "telemetry client connected");
                    tokio::spawn(handle_client(stream, Arc::clone(&self.brick)));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

async fn handle_client(stream: TcpStream, brick: Arc<Brick>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let query = match lines.next_line().await {
            Ok(Some(query)) => query,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "telemetry read failed");
                break;
            }
        };
        let brick = Arc::clone(&brick);
        // Bus-backed reads block on the bus lock.
        let reply = match tokio::task::spawn_blocking(move || answer(&brick, &query)).await {
            Ok(reply) => reply,
            Err(e) => format!("error: {e}"),
        };
        if let Err(e) = writer.write_all(format!("{reply}\n").as_bytes()).await {
            warn!(error = %e, "telemetry write failed");
            break;
        }
    }
}

/// Build the reply line for one query.
pub fn answer(brick: &Brick, query: &str) -> String {
    let mut words = query.split_whitespace();
    let (Some(kind), port) = (words.next(), words.next()) else {
        return "error: empty query".to_string();
    };
    if words.next().is_some() {
        return format!("error: malformed query {query:?}");
    }

    match (kind, port) {
        ("ports", None) => ports(brick),
        ("sensor", Some(port)) => match brick.sensor(port) {
            Some(sensor) => format!("sensor {port} {}", sensor.read()),
            None => no_device("sensor", port),
        },
        ("motor", Some(port)) => match brick.motor(port) {
            Some(motor) => format!("motor {port} {}", motor.power()),
            None => no_device("motor", port),
        },
        ("encoder", Some(port)) => match brick.encoder(port) {
            Some(encoder) => format!("encoder {port} {}", encoder.read()),
            None => no_device("encoder", port),
        },
        ("pwm", Some(port)) => match brick.pwm_capture(port) {
            Some(capture) => format!("pwm {port} {} {}", capture.frequency(), capture.duty()),
            None => no_device("pwm capture", port),
        },
        ("battery", None) => match brick.battery() {
            Some(battery) => format!("battery {:.2}", battery.read_voltage()),
            None => "error: no battery".to_string(),
        },
        ("accelerometer", None) | ("gyroscope", None) => {
            let sensor = if kind == "accelerometer" {
                brick.accelerometer()
            } else {
                brick.gyroscope()
            };
            match sensor {
                Some(sensor) => {
                    let [x, y, z] = sensor.read();
                    format!("{kind} {x} {y} {z}")
                }
                None => format!("error: no {kind}"),
            }
        }
        ("line", None) => match brick.line_sensor() {
            Some(worker) => {
                let [x, crossroad, mass] = worker.read().0;
                format!("line {x} {crossroad} {mass}")
            }
            None => "error: no line sensor".to_string(),
        },
        _ => format!("error: unknown query {query:?}"),
    }
}

fn ports(brick: &Brick) -> String {
    format!(
        "ports analog={} digital={} power={} servo={} encoders={} pwm={}",
        brick.sensor_ports(SensorType::Analog).join(","),
        brick.sensor_ports(SensorType::Digital).join(","),
        brick.motor_ports(MotorType::Power).join(","),
        brick.motor_ports(MotorType::Servo).join(","),
        brick.encoder_ports().join(","),
        brick.pwm_capture_ports().join(","),
    )
}

fn no_device(family: &str, port: &str) -> String {
    format!("error: no {family} on port {port}")
}
