// Timeouts, topics, motor and calibration defaults
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Publish telemetry every N control ticks (10 Hz at 50 Hz loop)
pub const TELEMETRY_DIVIDER: u64 = 5;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics, `{}` is replaced with the module name
pub const TOPIC_CMD: &str = "swerve/{}/cmd"; // steer + drive commands
pub const TOPIC_CALIBRATION: &str = "swerve/{}/calibration"; // save/reload/zero
pub const TOPIC_TELEMETRY: &str = "swerve/{}/telemetry"; // dashboard values
pub const TOPIC_HEALTH: &str = "swerve/{}/state/health"; // health status

/// Expand a topic template for one module
pub fn topic(template: &str, name: &str) -> String {
    template.replace("{}", name)
}

// Module defaults
pub const DEFAULT_MODULE_NAME: &str = "front-left";

// Serial port for Feetech motor controller
pub const MOTOR_PORT: &str = "/dev/tty.usbmodem58760432781";

// Feetech servo IDs for the steering and drive motors
pub const STEER_MOTOR_ID: u8 = 1;
pub const DRIVE_MOTOR_ID: u8 = 2;

// Durable calibration store
pub const PREFS_PATH: &str = "swerve-prefs.json";

// Enable hardware motor control (set to false for simulation/testing)
pub const MOTOR_ENABLED: bool = true;

// Servo encoder: 4096 ticks per revolution, reported as 1024 native counts
pub const TICKS_PER_NATIVE_COUNT: i32 = 4;

// Raw velocity command for 100% output (safety limit)
pub const MAX_RAW_VELOCITY: i16 = 3000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_expansion() {
        assert_eq!(topic(TOPIC_CMD, "fl"), "swerve/fl/cmd");
        assert_eq!(topic(TOPIC_HEALTH, "rear-right"), "swerve/rear-right/state/health");
    }
}
