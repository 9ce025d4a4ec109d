use spillway_core::{ManagerConfig, StepRule};
use tracing::info;

/// Shape of the next dispatch: how many bags to aim for and how many
/// expansions each one gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wave {
    pub parallelism: usize,
    pub iterations: u64,
}

/// Decides the wave shape from the number of bags currently in flight.
///
/// Consulted once before the first dispatch (with zero in flight) and once
/// per collected batch after that.
pub trait WavePolicy: Send {
    fn wave(&mut self, in_flight: u64) -> Wave;
}

/// The same shape for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct FixedWave(pub Wave);

impl WavePolicy for FixedWave {
    fn wave(&mut self, _in_flight: u64) -> Wave {
        self.0
    }
}

/// Ordered one-shot rules over a base shape.
///
/// Only the next unfired rule is checked; once it fires its shape sticks
/// until a later rule replaces it.
#[derive(Debug, Clone)]
pub struct SteppedWave {
    current: Wave,
    rules: Vec<StepRule>,
    next: usize,
}

impl SteppedWave {
    pub fn new(base: Wave, rules: Vec<StepRule>) -> Self {
        Self {
            current: base,
            rules,
            next: 0,
        }
    }

    /// Rules that have fired so far.
    pub fn fired(&self) -> usize {
        self.next
    }
}

impl WavePolicy for SteppedWave {
    fn wave(&mut self, in_flight: u64) -> Wave {
        if let Some(rule) = self.rules.get(self.next) {
            if rule.trigger.fires(in_flight) {
                self.current = Wave {
                    parallelism: rule.parallelism,
                    iterations: rule.iterations,
                };
                info!(
                    step = self.next,
                    in_flight,
                    parallelism = rule.parallelism,
                    iterations = rule.iterations,
                    "wave step fired"
                );
                self.next += 1;
            }
        }
        self.current
    }
}

impl<F> WavePolicy for F
where
    F: FnMut(u64) -> Wave + Send,
{
    fn wave(&mut self, in_flight: u64) -> Wave {
        self(in_flight)
    }
}

/// Policy described by the manager section of the config.
pub fn from_config(config: &ManagerConfig) -> Box<dyn WavePolicy> {
    let base = Wave {
        parallelism: config.parallelism,
        iterations: config.iterations_per_wave,
    };
    if config.steps.is_empty() {
        Box::new(FixedWave(base))
    } else {
        Box::new(SteppedWave::new(base, config.steps.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::StepTrigger;

    fn rule(trigger: StepTrigger, iterations: u64) -> StepRule {
        StepRule {
            trigger,
            parallelism: 5,
            iterations,
        }
    }

    fn hand_tuned() -> SteppedWave {
        SteppedWave::new(
            Wave {
                parallelism: 5,
                iterations: 5_000_000,
            },
            vec![
                rule(StepTrigger::Above(800), 2_500_000),
                rule(StepTrigger::Above(1300), 5_000_000),
                rule(StepTrigger::Below(1100), 2_500_000),
                rule(StepTrigger::Below(100), 1_000_000),
            ],
        )
    }

    #[test]
    fn steps_fire_in_order_once() {
        let mut policy = hand_tuned();
        assert_eq!(policy.wave(0).iterations, 5_000_000);
        // Below-1100 is not checked before the above-rules have fired.
        assert_eq!(policy.wave(50).iterations, 5_000_000);
        assert_eq!(policy.wave(801).iterations, 2_500_000);
        assert_eq!(policy.wave(900).iterations, 2_500_000);
        assert_eq!(policy.wave(1301).iterations, 5_000_000);
        assert_eq!(policy.wave(1099).iterations, 2_500_000);
        assert_eq!(policy.wave(99).iterations, 1_000_000);
        assert_eq!(policy.fired(), 4);
        assert_eq!(policy.wave(2000).iterations, 1_000_000);
    }

    #[test]
    fn thresholds_are_strict() {
        let mut policy = hand_tuned();
        assert_eq!(policy.wave(800).iterations, 5_000_000);
        assert_eq!(policy.fired(), 0);
    }

    #[test]
    fn closures_are_policies() {
        let mut policy = |in_flight: u64| Wave {
            parallelism: if in_flight > 10 { 1 } else { 8 },
            iterations: 100,
        };
        assert_eq!(WavePolicy::wave(&mut policy, 0).parallelism, 8);
        assert_eq!(WavePolicy::wave(&mut policy, 11).parallelism, 1);
    }

    #[test]
    fn config_without_steps_is_fixed() {
        let config = ManagerConfig::default();
        let mut policy = from_config(&config);
        assert_eq!(
            policy.wave(10_000),
            Wave {
                parallelism: 5,
                iterations: 5_000_000
            }
        );
    }
}
