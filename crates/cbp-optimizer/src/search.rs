//! Search space definitions and parameter search strategies.

use std::str::FromStr;

use cbp_types::{config_error, CbpError, CbpResult, ConfigError, ParameterSpec, ParameterValue, PredictorConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    Bool,
    /// Categorical choices.
    Choice { values: Vec<String> },
}

/// Ordered parameter assignment proposed by a strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSet(pub Vec<(String, ParameterValue)>);

impl ParameterSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Set a value, replacing any existing value for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ParameterValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write every value into `config`.
    pub fn apply_to(&self, config: &mut PredictorConfig) -> CbpResult<()> {
        for (name, value) in &self.0 {
            config.set_value(name, value.clone())?;
        }
        Ok(())
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_bool(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Bool,
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    /// Build the space for `names` from their definitions in `config`.
    ///
    /// Int and float parameters need both bounds; categorical parameters
    /// search over their possible values.
    pub fn from_config(config: &PredictorConfig, names: &[String]) -> CbpResult<Self> {
        let mut space = Self::new();
        for name in names {
            space = match config.require(name)? {
                ParameterSpec::Int(p) => {
                    let (low, high) = bounds(name, p.min, p.max)?;
                    if low > high {
                        return Err(config_error!(name, "int", "min {} is greater than max {}", low, high));
                    }
                    space.add_int(name.clone(), low, high)
                }
                ParameterSpec::Float(p) => {
                    let (low, high) = bounds(name, p.min, p.max)?;
                    if !(low <= high) {
                        return Err(config_error!(name, "float", "min {} is greater than max {}", low, high));
                    }
                    space.add_float(name.clone(), low, high)
                }
                ParameterSpec::Bool(_) => space.add_bool(name.clone()),
                ParameterSpec::Categorical(p) => {
                    if p.possible_values.is_empty() {
                        return Err(config_error!(name, "categorical", "no possible values to search"));
                    }
                    space.add_choice(name.clone(), p.possible_values.clone())
                }
            };
        }
        Ok(space)
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Total number of grid points (`None` if any parameter is continuous).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { .. } | ParameterKind::Bool | ParameterKind::Choice { .. } => {
                    axis_len(&param.kind, 2)?
                }
                ParameterKind::FloatRange { .. } => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    /// Whether `value` lies inside the dimension called `name`.
    pub fn contains(&self, name: &str, value: &ParameterValue) -> bool {
        let Some(param) = self.parameters.iter().find(|p| p.name == name) else {
            return false;
        };
        match (&param.kind, value) {
            (ParameterKind::IntRange { low, high }, ParameterValue::Int(v)) => low <= v && v <= high,
            (ParameterKind::FloatRange { low, high }, ParameterValue::Float(v)) => *low <= *v && *v <= *high,
            (ParameterKind::FloatRange { low, high }, ParameterValue::Int(v)) => {
                *low <= *v as f64 && *v as f64 <= *high
            }
            (ParameterKind::Bool, ParameterValue::Bool(_)) => true,
            (ParameterKind::Choice { values }, ParameterValue::Str(v)) => values.contains(v),
            _ => false,
        }
    }
}

fn bounds<T: Copy>(name: &str, min: Option<T>, max: Option<T>) -> CbpResult<(T, T)> {
    let missing = |bound: &str| -> CbpError {
        ConfigError::MissingBound {
            parameter: name.to_string(),
            bound: bound.to_string(),
        }
        .into()
    };
    Ok((min.ok_or_else(|| missing("min"))?, max.ok_or_else(|| missing("max"))?))
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn sample_dimension(rng: &mut StdRng, kind: &ParameterKind) -> ParameterValue {
    match kind {
        ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
        ParameterKind::FloatRange { low, high } => {
            if low < high {
                ParameterValue::Float(rng.random_range(*low..=*high))
            } else {
                ParameterValue::Float(*low)
            }
        }
        ParameterKind::Bool => ParameterValue::Bool(rng.random_bool(0.5)),
        ParameterKind::Choice { values } => {
            let idx = rng.random_range(0..values.len());
            ParameterValue::Str(values[idx].clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
///
/// Objectives are minimized.
pub trait SearchStrategy: Send + Sync {
    /// Generate up to `count` parameter combinations to evaluate. An empty
    /// batch means the strategy has nothing left to propose.
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet>;

    /// Report a completed evaluation so adaptive strategies can learn.
    fn report(&mut self, _params: &ParameterSet, _objective: f64) {}

    fn name(&self) -> &str;
}

/// Which strategy a study uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    #[default]
    Bayesian,
    Random,
    Grid,
}

impl FromStr for StrategyKind {
    type Err = CbpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bayesian" => Ok(Self::Bayesian),
            "random" => Ok(Self::Random),
            "grid" => Ok(Self::Grid),
            other => Err(cbp_types::validation_error!(
                "unknown search strategy \"{}\" (expected bayesian, random or grid)",
                other
            )),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bayesian => "bayesian",
            Self::Random => "random",
            Self::Grid => "grid",
        };
        write!(f, "{name}")
    }
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
///
/// Points are decoded from a running index, last dimension varying fastest,
/// so nothing is materialized up front.
#[derive(Debug, Clone)]
pub struct GridSearch {
    space: SearchSpace,
    axes: Vec<usize>,
    float_steps: usize,
    total: usize,
    cursor: usize,
}

impl GridSearch {
    /// `float_steps` points are placed evenly over each float dimension.
    ///
    /// Fails when the number of grid points does not fit in a `usize`.
    pub fn new(space: &SearchSpace, float_steps: usize) -> CbpResult<Self> {
        let float_steps = float_steps.max(2);
        let axes = space
            .parameters
            .iter()
            .map(|p| axis_len(&p.kind, float_steps))
            .collect::<Option<Vec<usize>>>();
        let total = axes
            .as_ref()
            .and_then(|axes| axes.iter().try_fold(1usize, |acc, n| acc.checked_mul(*n)));

        match (axes, total) {
            (Some(axes), Some(total)) => Ok(Self {
                space: space.clone(),
                axes,
                float_steps,
                total,
                cursor: 0,
            }),
            _ => Err(cbp_types::validation_error!(
                "grid over {:?} has too many points",
                space.names()
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn point(&self, mut index: usize) -> ParameterSet {
        let mut coords = vec![0; self.axes.len()];
        for (coord, len) in coords.iter_mut().zip(&self.axes).rev() {
            *coord = index % len;
            index /= len;
        }

        let mut params = ParameterSet::new();
        for (param, coord) in self.space.parameters.iter().zip(coords) {
            params.insert(param.name.clone(), axis_value(&param.kind, coord, self.float_steps));
        }
        params
    }
}

fn axis_len(kind: &ParameterKind, float_steps: usize) -> Option<usize> {
    match kind {
        ParameterKind::IntRange { low, high } => usize::try_from(*high as i128 - *low as i128 + 1).ok(),
        ParameterKind::FloatRange { .. } => Some(float_steps),
        ParameterKind::Bool => Some(2),
        ParameterKind::Choice { values } => Some(values.len()),
    }
}

fn axis_value(kind: &ParameterKind, coord: usize, float_steps: usize) -> ParameterValue {
    match kind {
        ParameterKind::IntRange { low, .. } => ParameterValue::Int((*low as i128 + coord as i128) as i64),
        ParameterKind::FloatRange { low, high } => {
            let t = coord as f64 / (float_steps - 1) as f64;
            ParameterValue::Float(low + t * (high - low))
        }
        ParameterKind::Bool => ParameterValue::Bool(coord == 1),
        ParameterKind::Choice { values } => ParameterValue::Str(values[coord].clone()),
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let end = self.cursor.saturating_add(count).min(self.total);
        let batch = (self.cursor..end).map(|i| self.point(i)).collect();
        self.cursor = end;
        batch
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: make_rng(seed),
        }
    }

    fn sample_one(&mut self) -> ParameterSet {
        let mut params = ParameterSet::new();
        for param in &self.space.parameters {
            params.insert(param.name.clone(), sample_dimension(&mut self.rng, &param.kind));
        }
        params
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search ----

/// Adaptive search that balances random exploration against local
/// perturbation of the best point seen so far.
///
/// With probability `exploration_weight` (and always before any observation)
/// a uniform sample is drawn; otherwise the lowest-objective point is
/// perturbed by up to a tenth of each dimension's range.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    observations: Vec<(ParameterSet, f64)>,
    exploration_weight: f64,
    rng: StdRng,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64, seed: Option<u64>) -> Self {
        Self {
            space,
            observations: Vec::new(),
            exploration_weight: exploration_weight.clamp(0.0, 1.0),
            rng: make_rng(seed),
        }
    }

    pub fn observations(&self) -> &[(ParameterSet, f64)] {
        &self.observations
    }

    fn explore(&mut self) -> ParameterSet {
        let mut params = ParameterSet::new();
        for param in &self.space.parameters {
            params.insert(param.name.clone(), sample_dimension(&mut self.rng, &param.kind));
        }
        params
    }

    /// Perturb the best-known (lowest objective) point.
    fn exploit(&mut self) -> ParameterSet {
        let best = self
            .observations
            .iter()
            .filter(|(_, objective)| objective.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(params, _)| params.clone());

        let Some(base) = best else {
            return self.explore();
        };

        let mut perturbed = ParameterSet::new();
        for param in &self.space.parameters {
            let rng = &mut self.rng;
            let value = match (&param.kind, base.get(&param.name)) {
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let step = ((*high as i128 - *low as i128) / 10).max(1) as i64;
                    let delta = rng.random_range(-step..=step);
                    ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = rng.random_range(-0.1..=0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::Bool, Some(ParameterValue::Bool(v))) => {
                    ParameterValue::Bool(if rng.random_bool(0.2) { !v } else { *v })
                }
                (ParameterKind::Choice { values }, Some(ParameterValue::Str(v)))
                    if values.contains(v) && !rng.random_bool(0.2) =>
                {
                    ParameterValue::Str(v.clone())
                }
                (kind, _) => sample_dimension(rng, kind),
            };
            perturbed.insert(param.name.clone(), value);
        }
        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count)
            .map(|_| {
                if self.observations.is_empty() || self.rng.random::<f64>() < self.exploration_weight {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &ParameterSet, objective: f64) {
        self.observations.push((params.clone(), objective));
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

/// Instantiate a strategy over `space`.
pub fn build_strategy(
    kind: StrategyKind,
    space: SearchSpace,
    seed: Option<u64>,
    exploration_weight: f64,
    grid_steps: usize,
) -> CbpResult<Box<dyn SearchStrategy>> {
    Ok(match kind {
        StrategyKind::Bayesian => Box::new(BayesianSearch::new(space, exploration_weight, seed)),
        StrategyKind::Random => Box::new(RandomSearch::new(space, seed)),
        StrategyKind::Grid => Box::new(GridSearch::new(&space, grid_steps)?),
    })
}
