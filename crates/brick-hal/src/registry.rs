//! [`Brick`] – owner of every device on the board.
//!
//! The brick is built once from a [`BrickConfig`].  Construction runs the
//! configured init script, opens the shared bus and then builds each device.
//! A device whose construction fails is logged, reported as a
//! [`EventPayload::HardwareFault`] and left out; the rest of the board still
//! comes up.
//!
//! Lookups are capability queries: an unknown port yields `None`.
//!
//! # Teardown
//!
//! Devices are dropped in field order.  Thread-owning devices (line sensor,
//! gamepad, input readers) go first, bus-backed ones next, and the
//! [`BusCommunicator`] they share last.

use std::collections::BTreeMap;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use brick_middleware::EventBus;
use brick_types::{BrickError, EventPayload, MotorType, SensorType};
use tracing::{debug, error, info, warn};

use crate::battery::Battery;
use crate::config::BrickConfig;
use crate::display::{Display, DisplaySurface, HeadlessSurface};
use crate::encoder::Encoder;
use crate::gamepad::Gamepad;
use crate::i2c::{BusCommunicator, BusTransport};
use crate::keys::Keys;
use crate::led::Led;
use crate::motor::{Motor, PowerMotor, ServoMotor};
use crate::pwm_capture::PwmCapture;
use crate::sensor::{AnalogSensor, DigitalSensor, Sensor};
use crate::sensor3d::ThreeAxisSensor;
use crate::telemetry_worker::TelemetryWorker;

const SOURCE: &str = "brick-hal::registry";

#[derive(Debug, Default)]
struct WaitState {
    wakeups: u64,
    waiters: usize,
}

/// Builder for [`Brick`], used to swap in transports and renderers.
pub struct BrickBuilder {
    config: BrickConfig,
    transport: Option<Box<dyn BusTransport>>,
    surface: Option<Box<dyn DisplaySurface>>,
    events: Option<EventBus>,
}

impl BrickBuilder {
    /// Use `transport` instead of opening the configured bus device.
    pub fn with_bus_transport(mut self, transport: Box<dyn BusTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Render the display through `surface`.  Defaults to a headless surface.
    pub fn with_display_surface(mut self, surface: Box<dyn DisplaySurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Publish brick events on an existing bus.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Run the init script and construct every configured device.
    pub fn build(self) -> Brick {
        let config = self.config;
        let events = self.events.unwrap_or_default();

        if let Some(script) = &config.init_script {
            run_init_script(script);
        }

        let bus = Arc::new(match self.transport {
            Some(transport) => BusCommunicator::new(transport),
            None => BusCommunicator::open(&config.bus.path),
        });
        let mut devices = DeviceSet::new(&events);
        let address = config.bus.device_id;

        let mut motors: BTreeMap<String, Box<dyn Motor>> = BTreeMap::new();
        for (port, cfg) in &config.power_motors {
            let motor = PowerMotor::new(port, Arc::clone(&bus), address, cfg);
            devices.insert_unique(&mut motors, port, Ok(Box::new(motor) as Box<dyn Motor>));
        }
        for (port, cfg) in &config.servo_motors {
            let motor = config
                .motor_type(port, &cfg.motor_type)
                .and_then(|calibration| ServoMotor::new(port, cfg, calibration))
                .map(|m| Box::new(m) as Box<dyn Motor>);
            devices.insert_unique(&mut motors, port, motor);
        }

        let mut pwm_captures = BTreeMap::new();
        for (port, cfg) in &config.pwm_captures {
            devices.insert_unique(&mut pwm_captures, port, PwmCapture::new(port, cfg));
        }

        let mut sensors: BTreeMap<String, Box<dyn Sensor>> = BTreeMap::new();
        for (port, cfg) in &config.analog_sensors {
            let sensor = AnalogSensor::new(port, Arc::clone(&bus), address, cfg);
            devices.insert_unique(&mut sensors, port, Ok(Box::new(sensor) as Box<dyn Sensor>));
        }
        for (port, cfg) in &config.sensors {
            let sensor = config
                .sensor_type(port, &cfg.sensor_type)
                .and_then(|range| DigitalSensor::new(port, cfg, range))
                .map(|s| Box::new(s) as Box<dyn Sensor>);
            devices.insert_unique(&mut sensors, port, sensor);
        }

        let encoders = config
            .encoders
            .iter()
            .map(|(port, cfg)| {
                let encoder = Encoder::new(port, Arc::clone(&bus), address, cfg);
                (port.clone(), encoder)
            })
            .collect();
        let battery = config
            .battery
            .as_ref()
            .map(|cfg| Battery::new(Arc::clone(&bus), address, cfg));

        let led = config
            .led
            .as_ref()
            .and_then(|cfg| devices.optional("led", Led::new(cfg)));
        let accelerometer = config.accelerometer.as_ref().and_then(|cfg| {
            devices.optional("accelerometer", ThreeAxisSensor::new("accelerometer", cfg))
        });
        let gyroscope = config
            .gyroscope
            .as_ref()
            .and_then(|cfg| devices.optional("gyroscope", ThreeAxisSensor::new("gyroscope", cfg)));
        let keys = config
            .keys
            .as_ref()
            .and_then(|cfg| devices.optional("keys", Keys::new(cfg)));
        let gamepad = config
            .gamepad
            .as_ref()
            .and_then(|cfg| devices.optional("gamepad", Gamepad::new(cfg)));
        let line_sensor = config.line_sensor.as_ref().and_then(|cfg| {
            devices.optional("line_sensor", TelemetryWorker::spawn("line_sensor", cfg))
        });

        let display = Display::new(self.surface.unwrap_or_else(|| Box::new(HeadlessSurface)));

        info!(
            motors = motors.len(),
            sensors = sensors.len(),
            failed = devices.failed,
            "brick ready"
        );

        Brick {
            line_sensor,
            gamepad,
            keys,
            accelerometer,
            gyroscope,
            display,
            led,
            motors,
            pwm_captures,
            sensors,
            encoders,
            battery,
            bus,
            wait_state: Mutex::new(WaitState::default()),
            wake: Condvar::new(),
            event_driven: AtomicBool::new(false),
            events,
        }
    }
}

/// Bookkeeping for device construction failures.
struct DeviceSet<'a> {
    events: &'a EventBus,
    failed: usize,
}

impl<'a> DeviceSet<'a> {
    fn new(events: &'a EventBus) -> Self {
        Self { events, failed: 0 }
    }

    fn report(&mut self, device: &str, err: &BrickError) {
        self.failed += 1;
        error!(device, error = %err, "device not available");
        self.events.publish(
            SOURCE,
            EventPayload::HardwareFault {
                component: device.to_string(),
                message: err.to_string(),
            },
        );
    }

    fn optional<T>(&mut self, device: &str, built: Result<T, BrickError>) -> Option<T> {
        built.map_err(|e| self.report(device, &e)).ok()
    }

    /// Insert into a category keyed by port; a second device on the same port
    /// is rejected.
    fn insert_unique<T>(
        &mut self,
        category: &mut BTreeMap<String, T>,
        port: &str,
        built: Result<T, BrickError>,
    ) {
        let built = built.and_then(|device| {
            if category.contains_key(port) {
                Err(BrickError::config(port, "port already in use"))
            } else {
                Ok(device)
            }
        });
        if let Some(device) = self.optional(port, built) {
            category.insert(port.to_string(), device);
        }
    }
}

fn run_init_script(script: &str) {
    match Command::new("sh").arg("-c").arg(script).status() {
        Ok(status) if status.success() => debug!(script, "init script finished"),
        Ok(status) => warn!(script, %status, "init script failed"),
        Err(e) => warn!(script, error = %e, "cannot run init script"),
    }
}

/// The device registry.
///
/// Shared as `Arc<Brick>` between the script runner, the command server and
/// anything else that needs the hardware.
pub struct Brick {
    line_sensor: Option<TelemetryWorker>,
    gamepad: Option<Gamepad>,
    keys: Option<Keys>,
    accelerometer: Option<ThreeAxisSensor>,
    gyroscope: Option<ThreeAxisSensor>,
    display: Display,
    led: Option<Led>,
    motors: BTreeMap<String, Box<dyn Motor>>,
    pwm_captures: BTreeMap<String, PwmCapture>,
    sensors: BTreeMap<String, Box<dyn Sensor>>,
    encoders: BTreeMap<String, Encoder>,
    battery: Option<Battery>,
    bus: Arc<BusCommunicator>,
    wait_state: Mutex<WaitState>,
    wake: Condvar,
    event_driven: AtomicBool,
    events: EventBus,
}

impl Brick {
    /// Start configuring a brick; see [`BrickBuilder`].
    pub fn builder(config: BrickConfig) -> BrickBuilder {
        BrickBuilder {
            config,
            transport: None,
            surface: None,
            events: None,
        }
    }

    /// Build a brick on the configured bus with a headless display.
    pub fn new(config: BrickConfig) -> Self {
        Self::builder(config).build()
    }

    // ── Lookup ─────────────────────────────────────────────────────────────
    //
    // Every lookup returns `None` for a port (or device) that is not
    // configured or failed to come up.

    /// Motor of either family on `port`.
    pub fn motor(&self, port: &str) -> Option<&dyn Motor> {
        self.motors.get(port).map(|m| m.as_ref())
    }

    /// PWM capture channel on `port`.
    pub fn pwm_capture(&self, port: &str) -> Option<&PwmCapture> {
        self.pwm_captures.get(port)
    }

    /// Analog or digital sensor on `port`.
    pub fn sensor(&self, port: &str) -> Option<&dyn Sensor> {
        self.sensors.get(port).map(|s| s.as_ref())
    }

    /// Encoder on `port`.
    pub fn encoder(&self, port: &str) -> Option<&Encoder> {
        self.encoders.get(port)
    }

    /// Battery monitor, if configured.
    pub fn battery(&self) -> Option<&Battery> {
        self.battery.as_ref()
    }

    /// Accelerometer, if configured and readable.
    pub fn accelerometer(&self) -> Option<&ThreeAxisSensor> {
        self.accelerometer.as_ref()
    }

    /// Gyroscope, if configured and readable.
    pub fn gyroscope(&self) -> Option<&ThreeAxisSensor> {
        self.gyroscope.as_ref()
    }

    /// Board keys, if configured.
    pub fn keys(&self) -> Option<&Keys> {
        self.keys.as_ref()
    }

    /// Status LED, if configured.
    pub fn led(&self) -> Option<&Led> {
        self.led.as_ref()
    }

    /// Remote gamepad listener, if configured.
    pub fn gamepad(&self) -> Option<&Gamepad> {
        self.gamepad.as_ref()
    }

    /// The display.  Always present; headless unless a surface was given.
    pub fn display(&self) -> &Display {
        &self.display
    }

    /// Vision line sensor, if its detector started.
    pub fn line_sensor(&self) -> Option<&TelemetryWorker> {
        self.line_sensor.as_ref()
    }

    /// Ports of the motors of one family, in port order.
    pub fn motor_ports(&self, motor_type: MotorType) -> Vec<String> {
        self.motors
            .values()
            .filter(|m| m.motor_type() == motor_type)
            .map(|m| m.port().to_string())
            .collect()
    }

    /// Ports of the sensors of one family, in port order.
    pub fn sensor_ports(&self, sensor_type: SensorType) -> Vec<String> {
        self.sensors
            .values()
            .filter(|s| s.sensor_type() == sensor_type)
            .map(|s| s.port().to_string())
            .collect()
    }

    /// Encoder ports, in port order.
    pub fn encoder_ports(&self) -> Vec<String> {
        self.encoders.keys().cloned().collect()
    }

    /// PWM capture ports, in port order.
    pub fn pwm_capture_ports(&self) -> Vec<String> {
        self.pwm_captures.keys().cloned().collect()
    }

    /// The communicator shared by every bus-backed device.
    pub fn bus(&self) -> &Arc<BusCommunicator> {
        &self.bus
    }

    /// Bus carrying this brick's events.
    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    // ── Control ────────────────────────────────────────────────────────────

    /// Emergency halt: power off every motor, turn the LED red, hide the
    /// display and release any pending [`wait`](Self::wait).
    ///
    /// Idempotent and callable from any thread.
    pub fn stop(&self) {
        for motor in self.motors.values() {
            motor.power_off();
        }
        if let Some(led) = &self.led {
            led.red();
        }
        self.display.hide();
        self.stop_waiting();
        info!("brick stopped");
        self.events.publish(SOURCE, EventPayload::BrickStopped);
    }

    /// Block the calling thread for `duration`, or until
    /// [`stop_waiting`](Self::stop_waiting) is called from elsewhere.
    pub fn wait(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut state = self.wait_state.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = state.wakeups;
        state.waiters += 1;
        while state.wakeups == seen {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        state.waiters -= 1;
    }

    /// Release every thread currently inside [`wait`](Self::wait).  Does
    /// nothing when nobody waits.
    pub fn stop_waiting(&self) {
        let mut state = self.wait_state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.waiters > 0 {
            state.wakeups = state.wakeups.wrapping_add(1);
            self.wake.notify_all();
        }
    }

    /// Mark the board as driven by a script.
    pub fn run(&self) {
        self.event_driven.store(true, Ordering::SeqCst);
    }

    /// Hand the board back to interactive control.
    pub fn reset_event_driven_mode(&self) {
        self.event_driven.store(false, Ordering::SeqCst);
    }

    pub fn is_in_event_driven_mode(&self) -> bool {
        self.event_driven.load(Ordering::SeqCst)
    }

    /// Ask the hosting process to shut down.  The brick itself keeps running.
    pub fn quit(&self) {
        info!("quit requested");
        self.events.publish(SOURCE, EventPayload::Quit);
    }

    /// Milliseconds since the Unix epoch.
    pub fn time(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Start `command` through `sh -c` without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Process`] when the shell cannot be started.
    pub fn system(&self, command: &str) -> Result<(), BrickError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .map_err(|e| BrickError::Process {
                sensor: "system".to_string(),
                details: format!("cannot run '{command}': {e}"),
            })?;
        debug!(command, pid = child.id(), "system command started");
        // Reap in the background so the child never lingers as a zombie.
        thread::spawn(move || child.wait());
        Ok(())
    }
}

impl Drop for Brick {
    fn drop(&mut self) {
        debug!("brick shutting down");
    }
}
