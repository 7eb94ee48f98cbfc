//! PI admission controller.

use tracing::{debug, warn};

use capgrid_core::config::ControlConfig;

/// Controller gains, tuned offline from the identified node model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiGains {
    pub kp: f64,
    pub ki: f64,
}

/// Bounds on the capacity setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub min_pods: u32,
    pub max_pods: u32,
}

impl AdmissionLimits {
    fn clamp(&self, control: f64) -> u32 {
        let floored = control.floor();
        if floored <= self.min_pods as f64 {
            self.min_pods
        } else if floored >= self.max_pods as f64 {
            self.max_pods
        } else {
            floored as u32
        }
    }
}

/// Mutable controller state, persisted between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    /// Error at time k.
    pub error_k: f64,
    /// Error at time k-1.
    pub error_k_1: f64,
    /// Control input at time k.
    pub control_k: f64,
    /// Control input at time k-1.
    pub control_k_1: f64,
    /// Current capacity setpoint.
    pub max_pods: u32,
    /// Last measured utilization (percent).
    pub current_util: f64,
    /// Number of samples applied so far.
    pub samples: u64,
}

/// One applied control step, as exported for offline plotting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSample {
    pub max_pods: u32,
    pub measured: f64,
    pub error: f64,
}

/// Converts utilization samples of a single node into a pod-capacity setpoint.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    node: String,
    gains: PiGains,
    target: f64,
    band: (f64, f64),
    limits: AdmissionLimits,
    state: ControllerState,
}

impl AdmissionController {
    /// Create a controller with zeroed history. The initial setpoint is the
    /// lower capacity limit.
    pub fn new(
        node: &str,
        gains: PiGains,
        target: f64,
        band: (f64, f64),
        limits: AdmissionLimits,
    ) -> Self {
        Self {
            node: node.to_string(),
            gains,
            target,
            band,
            limits,
            state: ControllerState {
                error_k: 0.0,
                error_k_1: 0.0,
                control_k: 0.0,
                control_k_1: 0.0,
                max_pods: limits.min_pods,
                current_util: 0.0,
                samples: 0,
            },
        }
    }

    /// Build a controller from the `[control]` config section.
    pub fn from_config(node: &str, config: &ControlConfig) -> Self {
        Self::new(
            node,
            PiGains {
                kp: config.kp,
                ki: config.ki,
            },
            config.target_utilization,
            config.utilization_band,
            AdmissionLimits {
                min_pods: config.min_pods,
                max_pods: config.max_pods,
            },
        )
    }

    /// Apply one utilization sample and return the new capacity setpoint.
    ///
    /// A non-finite sample is treated as missing (see [`hold`](Self::hold)).
    pub fn update(&mut self, measured: f64) -> u32 {
        if !measured.is_finite() {
            warn!(node = %self.node, measured, "non-finite utilization sample ignored");
            return self.hold();
        }

        let PiGains { kp, ki } = self.gains;
        let s = &mut self.state;

        s.error_k_1 = s.error_k;
        s.control_k_1 = s.control_k;

        s.error_k = self.target - measured;
        let adjustment = (kp + ki) * s.error_k - kp * s.error_k_1;
        s.control_k = s.control_k_1 + adjustment;

        s.max_pods = self.limits.clamp(s.control_k);
        s.current_util = measured;
        s.samples += 1;

        let (low, high) = self.band;
        debug!(
            node = %self.node,
            measured,
            error = s.error_k,
            adjustment,
            control = s.control_k,
            max_pods = s.max_pods,
            in_band = (low..=high).contains(&measured),
            "admission controller updated"
        );

        s.max_pods
    }

    /// Skip this cycle: keep every piece of state and return the previous
    /// setpoint.
    pub fn hold(&self) -> u32 {
        debug!(
            node = %self.node,
            max_pods = self.state.max_pods,
            "no utilization sample, setpoint held"
        );
        self.state.max_pods
    }

    /// Current capacity setpoint.
    pub fn max_pods(&self) -> u32 {
        self.state.max_pods
    }

    /// Last measured utilization.
    pub fn current_util(&self) -> f64 {
        self.state.current_util
    }

    /// The most recent applied step, if any sample has been applied.
    pub fn last_sample(&self) -> Option<ControlSample> {
        (self.state.samples > 0).then_some(ControlSample {
            max_pods: self.state.max_pods,
            measured: self.state.current_util,
            error: self.state.error_k,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn limits(&self) -> AdmissionLimits {
        self.limits
    }

    pub fn target(&self) -> f64 {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdmissionController {
        AdmissionController::new(
            "node1",
            PiGains {
                kp: 0.094,
                ki: 0.006,
            },
            80.0,
            (75.0, 85.0),
            AdmissionLimits {
                min_pods: 0,
                max_pods: 8,
            },
        )
    }

    #[test]
    fn first_step_matches_hand_computation() {
        let mut c = controller();
        assert_eq!(c.update(60.0), 2);

        let s = c.state();
        assert_eq!(s.error_k, 20.0);
        assert_eq!(s.error_k_1, 0.0);
        assert!((s.control_k - 2.0).abs() < 1e-12);
        assert_eq!(s.control_k_1, 0.0);
        assert_eq!(s.current_util, 60.0);
    }

    #[test]
    fn history_shifts_each_update() {
        let mut c = controller();
        c.update(60.0);
        c.update(70.0);

        let s = c.state();
        assert_eq!(s.error_k, 10.0);
        assert_eq!(s.error_k_1, 20.0);
        // u(2) = 2.0 + 0.1 * 10 - 0.094 * 20 = 1.12
        assert!((s.control_k - 1.12).abs() < 1e-9);
        assert!((s.control_k_1 - 2.0).abs() < 1e-12);
        assert_eq!(c.max_pods(), 1);
    }

    #[test]
    fn setpoint_clamped_to_limits() {
        let mut c = controller();
        // Idle node: error stays at 80 and the integral keeps growing.
        for _ in 0..50 {
            assert!(c.update(0.0) <= 8);
        }
        assert_eq!(c.max_pods(), 8);

        // Saturated node drives the control input negative.
        for _ in 0..200 {
            c.update(100.0);
        }
        assert_eq!(c.max_pods(), 0);
        assert!(c.state().control_k < 0.0);
    }

    #[test]
    fn setpoint_always_within_bounds_for_varied_samples() {
        let mut c = AdmissionController::new(
            "node2",
            PiGains { kp: 0.5, ki: 0.3 },
            80.0,
            (75.0, 85.0),
            AdmissionLimits {
                min_pods: 1,
                max_pods: 5,
            },
        );
        let samples = [0.0, 100.0, 42.5, 80.0, 95.3, 3.0, 60.0, 100.0, 100.0, 0.0, 79.9];
        for (i, sample) in samples.iter().cycle().take(500).enumerate() {
            let pods = c.update(*sample + (i % 7) as f64);
            assert!((1..=5).contains(&pods), "step {i}: {pods}");
        }
    }

    #[test]
    fn hold_keeps_state_untouched() {
        let mut c = controller();
        c.update(60.0);
        let before = c.state().clone();

        assert_eq!(c.hold(), 2);
        assert_eq!(c.state(), &before);
    }

    #[test]
    fn non_finite_sample_is_skipped() {
        let mut c = controller();
        c.update(60.0);
        let before = c.state().clone();

        assert_eq!(c.update(f64::NAN), 2);
        assert_eq!(c.update(f64::INFINITY), 2);
        assert_eq!(c.state(), &before);
    }

    #[test]
    fn last_sample_reports_applied_step() {
        let mut c = controller();
        assert_eq!(c.last_sample(), None);
        c.update(60.0);
        assert_eq!(
            c.last_sample(),
            Some(ControlSample {
                max_pods: 2,
                measured: 60.0,
                error: 20.0,
            })
        );
    }
}
