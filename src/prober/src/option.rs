use std::time::Duration;

pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);

/// One probe target and how to judge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthOption {
    pub address: String,
    pub success_threshold: u32,
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub period: Duration,
    pub initial_condition: bool,
}

impl Default for HealthOption {
    fn default() -> Self {
        HealthOption {
            address: String::new(),
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
            period: DEFAULT_PERIOD,
            initial_condition: true,
        }
    }
}

impl HealthOption {
    pub fn new(address: &str) -> HealthOption {
        HealthOption {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Replaces zero values with the defaults.
    pub fn normalized(mut self) -> HealthOption {
        if self.success_threshold == 0 {
            self.success_threshold = DEFAULT_SUCCESS_THRESHOLD;
        }
        if self.failure_threshold == 0 {
            self.failure_threshold = DEFAULT_FAILURE_THRESHOLD;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.period.is_zero() {
            self.period = DEFAULT_PERIOD;
        }
        self
    }

    /// Whether a worker started with `other` probes the same way.
    /// The initial condition only seeds a new worker, so it is not compared.
    pub fn same_target(&self, other: &HealthOption) -> bool {
        self.address == other.address
            && self.success_threshold == other.success_threshold
            && self.failure_threshold == other.failure_threshold
            && self.timeout == other.timeout
            && self.period == other.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_normalized() {
        let opt = HealthOption {
            address: "10.0.0.1:80".to_string(),
            success_threshold: 0,
            failure_threshold: 5,
            timeout: Duration::ZERO,
            period: Duration::from_secs(1),
            initial_condition: false,
        }
        .normalized();
        assert_eq!(DEFAULT_SUCCESS_THRESHOLD, opt.success_threshold);
        assert_eq!(5, opt.failure_threshold);
        assert_eq!(DEFAULT_TIMEOUT, opt.timeout);
        assert_eq!(Duration::from_secs(1), opt.period);
        assert!(!opt.initial_condition);
    }

    #[test]
    fn works_same_target() {
        let opt = HealthOption::new("10.0.0.1:80");
        let flipped = HealthOption {
            initial_condition: false,
            ..opt.clone()
        };
        assert!(opt.same_target(&flipped));

        let slower = HealthOption {
            period: Duration::from_secs(10),
            ..opt.clone()
        };
        assert!(!opt.same_target(&slower));
        assert!(!opt.same_target(&HealthOption::new("10.0.0.2:80")));
    }
}
