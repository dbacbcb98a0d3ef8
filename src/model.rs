//! Hidden Markov model probabilities and D-segment scoring

use crate::{DsegError, DsegResult, ModelConfig};
use std::f64::consts::LN_2;
use std::fmt;
use std::str::FromStr;

/// Number of states in the Poisson-parameterised model (0 is the unused initial state)
pub const DEFAULT_NUM_STATES: usize = 3;

/// The two states a D-segment score compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Background,
    Elevated,
}

impl State {
    /// Index of the state in the model tables
    pub fn index(self) -> usize {
        match self {
            State::Background => 1,
            State::Elevated => 2,
        }
    }
}

/// Scoring is only defined between these two states: (background, elevated)
pub const SCORING_STATES: (State, State) = (State::Background, State::Elevated);

/// Discretised read-start count. `ThreeOrMore` right-censors everything above 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Zero,
    One,
    Two,
    ThreeOrMore,
}

impl Bucket {
    pub const COUNT: usize = 4;
    pub const ALL: [Bucket; Bucket::COUNT] =
        [Bucket::Zero, Bucket::One, Bucket::Two, Bucket::ThreeOrMore];

    /// Clamp a raw read-start count into its bucket
    pub fn from_count(count: u32) -> Self {
        match count {
            0 => Bucket::Zero,
            1 => Bucket::One,
            2 => Bucket::Two,
            _ => Bucket::ThreeOrMore,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Bucket::Zero => 0,
            Bucket::One => 1,
            Bucket::Two => 2,
            Bucket::ThreeOrMore => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Bucket::Zero => "0",
            Bucket::One => "1",
            Bucket::Two => "2",
            Bucket::ThreeOrMore => "3",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Bucket {
    type Err = DsegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bucket::ALL
            .iter()
            .copied()
            .find(|bucket| bucket.label() == s)
            .ok_or_else(|| DsegError::OutOfRange(format!("Unknown emission bucket: {}", s)))
    }
}

/// A probability together with its natural log.
///
/// A probability of exactly zero stores NaN as its log rather than `-inf`,
/// so any score built from it is NaN as well.
#[derive(Debug, Clone, Copy)]
struct Probability {
    linear: f64,
    log: f64,
}

impl Probability {
    const ZERO: Probability = Probability {
        linear: 0.0,
        log: f64::NAN,
    };

    fn new(value: f64) -> Self {
        let log = if value == 0.0 { f64::NAN } else { value.ln() };
        Self { linear: value, log }
    }
}

/// Initiation, transition and emission probabilities of an HMM, each mirrored
/// in the log domain.
///
/// The model holds any number of states, but [`ProbabilityModel::d_segment_score`]
/// and [`ProbabilityModel::threshold`] are only defined over [`SCORING_STATES`].
#[derive(Debug, Clone)]
pub struct ProbabilityModel {
    num_states: usize,
    initiation: Vec<Probability>,
    transition: Vec<Vec<Probability>>,
    emission: Vec<[Probability; Bucket::COUNT]>,
}

impl ProbabilityModel {
    /// Create a model with every probability set to zero
    pub fn with_states(num_states: usize) -> Self {
        Self {
            num_states,
            initiation: vec![Probability::ZERO; num_states],
            transition: vec![vec![Probability::ZERO; num_states]; num_states],
            emission: vec![[Probability::ZERO; Bucket::COUNT]; num_states],
        }
    }

    /// Build the two-state model from expected run lengths and Poisson means.
    ///
    /// Self-transitions are `1 - 1/length`; emissions follow the Poisson PMF
    /// with the top bucket absorbing the remaining mass.
    pub fn from_lengths_and_means(
        normal_length: u64,
        elevated_length: u64,
        normal_mean: f64,
        elevated_mean: f64,
    ) -> Self {
        let mut model = Self::with_states(DEFAULT_NUM_STATES);
        let background = State::Background.index();
        let elevated = State::Elevated.index();

        let normal_switch = 1.0 / normal_length as f64;
        let elevated_switch = 1.0 / elevated_length as f64;
        model.transition[background][background] = Probability::new(1.0 - normal_switch);
        model.transition[background][elevated] = Probability::new(normal_switch);
        model.transition[elevated][background] = Probability::new(elevated_switch);
        model.transition[elevated][elevated] = Probability::new(1.0 - elevated_switch);

        model.initiation[background] = Probability::new(0.5);
        model.initiation[elevated] = Probability::new(0.5);

        model.populate_poisson_emissions(background, normal_mean);
        model.populate_poisson_emissions(elevated, elevated_mean);
        model
    }

    /// Validate the configuration and build the Poisson model from it
    pub fn from_config(config: &ModelConfig) -> DsegResult<Self> {
        validate_model_config(config)?;
        Ok(Self::from_lengths_and_means(
            config.normal_length,
            config.elevated_length,
            config.normal_mean,
            config.elevated_mean,
        ))
    }

    fn populate_poisson_emissions(&mut self, state: usize, mean: f64) {
        let mut remaining = 1.0;
        for bucket in [Bucket::Zero, Bucket::One, Bucket::Two] {
            let probability = poisson_pmf(mean, bucket.index() as u32);
            remaining -= probability;
            self.emission[state][bucket.index()] = Probability::new(probability);
        }
        self.emission[state][Bucket::ThreeOrMore.index()] = Probability::new(remaining);
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    fn check_state(&self, state: usize) -> DsegResult<()> {
        if state >= self.num_states {
            return Err(DsegError::OutOfRange(format!(
                "State {} not in model with {} states",
                state, self.num_states
            )));
        }
        Ok(())
    }

    pub fn set_initiation_probability(&mut self, state: usize, value: f64) -> DsegResult<()> {
        self.check_state(state)?;
        self.initiation[state] = Probability::new(value);
        Ok(())
    }

    pub fn set_transition_probability(
        &mut self,
        from: usize,
        to: usize,
        value: f64,
    ) -> DsegResult<()> {
        self.check_state(from)?;
        self.check_state(to)?;
        self.transition[from][to] = Probability::new(value);
        Ok(())
    }

    pub fn set_emission_probability(
        &mut self,
        state: usize,
        bucket: Bucket,
        value: f64,
    ) -> DsegResult<()> {
        self.check_state(state)?;
        self.emission[state][bucket.index()] = Probability::new(value);
        Ok(())
    }

    fn initiation_entry(&self, state: usize) -> DsegResult<Probability> {
        self.check_state(state)?;
        Ok(self.initiation[state])
    }

    fn transition_entry(&self, from: usize, to: usize) -> DsegResult<Probability> {
        self.check_state(from)?;
        self.check_state(to)?;
        Ok(self.transition[from][to])
    }

    fn emission_entry(&self, state: usize, bucket: Bucket) -> DsegResult<Probability> {
        self.check_state(state)?;
        Ok(self.emission[state][bucket.index()])
    }

    pub fn initiation_probability(&self, state: usize) -> DsegResult<f64> {
        Ok(self.initiation_entry(state)?.linear)
    }

    pub fn log_initiation_probability(&self, state: usize) -> DsegResult<f64> {
        Ok(self.initiation_entry(state)?.log)
    }

    pub fn transition_probability(&self, from: usize, to: usize) -> DsegResult<f64> {
        Ok(self.transition_entry(from, to)?.linear)
    }

    pub fn log_transition_probability(&self, from: usize, to: usize) -> DsegResult<f64> {
        Ok(self.transition_entry(from, to)?.log)
    }

    pub fn emission_probability(&self, state: usize, bucket: Bucket) -> DsegResult<f64> {
        Ok(self.emission_entry(state, bucket)?.linear)
    }

    pub fn log_emission_probability(&self, state: usize, bucket: Bucket) -> DsegResult<f64> {
        Ok(self.emission_entry(state, bucket)?.log)
    }

    /// Log2 likelihood ratio of extending an elevated run versus a background
    /// run by one position emitting `bucket`.
    pub fn d_segment_score(&self, bucket: Bucket) -> DsegResult<f64> {
        let (background, elevated) = (SCORING_STATES.0.index(), SCORING_STATES.1.index());
        let elevated_score = self.log_emission_probability(elevated, bucket)?
            + self.log_transition_probability(elevated, elevated)?;
        let background_score = self.log_emission_probability(background, bucket)?
            + self.log_transition_probability(background, background)?;
        Ok((elevated_score - background_score) / LN_2)
    }

    /// Scores for every bucket, indexed by [`Bucket::index`]
    pub fn score_table(&self) -> DsegResult<[f64; Bucket::COUNT]> {
        let mut table = [0.0; Bucket::COUNT];
        for bucket in Bucket::ALL {
            table[bucket.index()] = self.d_segment_score(bucket)?;
        }
        Ok(table)
    }

    /// Log2 odds of staying in each state versus switching away and back.
    ///
    /// A candidate segment ends once the cumulative score falls this far below
    /// its running maximum, and is reported only if that maximum reaches it.
    pub fn threshold(&self) -> DsegResult<f64> {
        let (background, elevated) = (SCORING_STATES.0.index(), SCORING_STATES.1.index());
        let same_state = self.log_transition_probability(background, background)?
            + self.log_transition_probability(elevated, elevated)?;
        let switch_state = self.log_transition_probability(background, elevated)?
            + self.log_transition_probability(elevated, background)?;
        Ok((same_state - switch_state) / LN_2)
    }

    /// True if any bucket scores NaN because a probability it uses is zero
    pub fn has_undefined_scores(&self) -> bool {
        match self.score_table() {
            Ok(table) => table.iter().any(|score| score.is_nan()),
            Err(_) => true,
        }
    }
}

/// Poisson probability mass `mean^k e^-mean / k!`, computed in log space
pub fn poisson_pmf(mean: f64, k: u32) -> f64 {
    if k == 0 {
        return (-mean).exp();
    }
    let ln_factorial: f64 = (2..=k).map(|i| f64::from(i).ln()).sum();
    (f64::from(k) * mean.ln() - mean - ln_factorial).exp()
}

/// Validate model configuration parameters
pub fn validate_model_config(config: &ModelConfig) -> DsegResult<()> {
    if config.normal_length == 0 || config.elevated_length == 0 {
        return Err(DsegError::InvalidConfig(
            "expected segment lengths must be at least 1".to_string(),
        ));
    }

    for (name, mean) in [
        ("normal_mean", config.normal_mean),
        ("elevated_mean", config.elevated_mean),
    ] {
        if !mean.is_finite() || mean < 0.0 {
            return Err(DsegError::InvalidConfig(format!(
                "{} must be a finite, non-negative number (got {})",
                name, mean
            )));
        }
    }

    if config.normal_length == 1 || config.elevated_length == 1 {
        log::warn!("A segment length of 1 gives a zero self-transition; scores will be undefined");
    }

    Ok(())
}
