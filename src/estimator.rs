//! ==============================================================================
//! estimator.rs - trace-metal estimator gateway
//! ==============================================================================
//!
//! purpose:
//!     wraps the external arsenic and barium predictors behind one contract:
//!     features in, value-or-absent out. a missing model, a missing input or
//!     a bad prediction leaves the derived field absent and never fails the
//!     ingest pipeline.
//!
//! relationships:
//!     - used by: service.rs (between normalize and persist)
//!     - loads: models/arsenic.json, models/barium.json (paths from hub.toml)
//!
//! model files:
//!     the predictors are trained elsewhere and exported as a linear model:
//!
//!         {"feature_names": ["TDS", "EC", "Temp"],
//!          "coefficients": [0.8, 2.1, -0.05],
//!          "intercept": 1.7}
//!
//!     the feature vector is built in `feature_names` order.
//!
//! ==============================================================================

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::EstimatorsConfig;
use crate::domain::{Field, Reading};
use crate::error::EstimatorError;

/// a scoring function over a fixed, ordered feature vector
pub trait Estimator: Send + Sync {
    /// reading keys in the order `predict` expects them
    fn feature_names(&self) -> &[Field];

    fn predict(&self, features: &[f64]) -> Result<f64, EstimatorError>;
}

/// derived quantities the gateway can attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Arsenic,
    Barium,
}

impl Target {
    pub fn name(&self) -> &'static str {
        match self {
            Target::Arsenic => "Arsenic",
            Target::Barium => "Barium",
        }
    }

    /// inputs that must all be present before the estimator is consulted
    pub fn required_inputs(&self) -> &'static [Field] {
        match self {
            Target::Arsenic => &[Field::Tds, Field::Ec, Field::Temp],
            Target::Barium => &[
                Field::Ph,
                Field::Tds,
                Field::Ec,
                Field::DissolvedOxygen,
                Field::Temp,
            ],
        }
    }

    fn slot<'a>(&self, reading: &'a mut Reading) -> &'a mut Option<f64> {
        match self {
            Target::Arsenic => &mut reading.arsenic,
            Target::Barium => &mut reading.barium,
        }
    }
}

// ==============================================================================
// linear model - the exported predictor format
// ==============================================================================

#[derive(Debug, Deserialize)]
struct LinearModelFile {
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    features: Vec<Field>,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    /// build a model, checking it is usable for `target`
    pub fn new(
        target: Target,
        features: Vec<Field>,
        coefficients: Vec<f64>,
        intercept: f64,
    ) -> Result<Self, EstimatorError> {
        if features.len() != coefficients.len() {
            return Err(EstimatorError::Model(format!(
                "{} feature names but {} coefficients",
                features.len(),
                coefficients.len()
            )));
        }

        let trained: HashSet<Field> = features.iter().copied().collect();
        let required: HashSet<Field> = target.required_inputs().iter().copied().collect();
        if trained.len() != features.len() || trained != required {
            return Err(EstimatorError::Model(format!(
                "{} model must be trained on exactly {:?}",
                target.name(),
                target.required_inputs().iter().map(|f| f.key()).collect::<Vec<_>>()
            )));
        }

        Ok(Self { features, coefficients, intercept })
    }

    /// load an exported model file
    pub fn load<P: AsRef<Path>>(target: Target, path: P) -> Result<Self, EstimatorError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EstimatorError::Unavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file: LinearModelFile = serde_json::from_str(&content).map_err(|e| {
            EstimatorError::Unavailable(format!("cannot parse {}: {}", path.display(), e))
        })?;

        let features = file
            .feature_names
            .iter()
            .map(|name| {
                Field::from_key(name).ok_or_else(|| {
                    EstimatorError::Model(format!("unknown feature name '{}'", name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(target, features, file.coefficients, file.intercept)
    }
}

impl Estimator for LinearModel {
    fn feature_names(&self) -> &[Field] {
        &self.features
    }

    fn predict(&self, features: &[f64]) -> Result<f64, EstimatorError> {
        if features.len() != self.coefficients.len() {
            return Err(EstimatorError::Model(format!(
                "expected {} features, got {}",
                self.coefficients.len(),
                features.len()
            )));
        }
        Ok(self.intercept
            + features
                .iter()
                .zip(&self.coefficients)
                .map(|(x, w)| x * w)
                .sum::<f64>())
    }
}

// ==============================================================================
// gateway
// ==============================================================================

struct Slot {
    target: Target,
    model: Option<Arc<dyn Estimator>>,
}

/// holds zero, one or both estimators; cheap to clone
#[derive(Clone)]
pub struct EstimatorGateway {
    slots: Arc<Vec<Slot>>,
}

impl EstimatorGateway {
    pub fn new(arsenic: Option<Arc<dyn Estimator>>, barium: Option<Arc<dyn Estimator>>) -> Self {
        Self {
            slots: Arc::new(vec![
                Slot { target: Target::Arsenic, model: arsenic },
                Slot { target: Target::Barium, model: barium },
            ]),
        }
    }

    /// gateway with no models loaded; every derived field stays absent
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// load the configured model files, leaving failures unavailable
    pub fn from_config(config: &EstimatorsConfig) -> Self {
        let load = |target: Target, path: &Option<String>| -> Option<Arc<dyn Estimator>> {
            let path = path.as_ref()?;
            match LinearModel::load(target, path) {
                Ok(model) => {
                    info!(estimator = target.name(), path = %path, "estimator loaded");
                    Some(Arc::new(model))
                }
                Err(e) => {
                    warn!(estimator = target.name(), error = %e, "estimator unavailable");
                    None
                }
            }
        };

        Self::new(
            load(Target::Arsenic, &config.arsenic_model),
            load(Target::Barium, &config.barium_model),
        )
    }

    pub fn is_available(&self, target: Target) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.target == target && slot.model.is_some())
    }

    /// attach every derived value that can be computed
    pub fn estimate(&self, mut reading: Reading) -> Reading {
        for slot in self.slots.iter() {
            let value = match Self::run(slot, &reading) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(estimator = slot.target.name(), reason = %e, "derived field skipped");
                    None
                }
            };
            *slot.target.slot(&mut reading) = value;
        }
        reading
    }

    fn run(slot: &Slot, reading: &Reading) -> Result<f64, EstimatorError> {
        // inputs are checked first so a missing field never reaches a model
        for field in slot.target.required_inputs() {
            if reading.measurement(*field).value().is_none() {
                return Err(EstimatorError::InputIncomplete(field.key()));
            }
        }

        let model = slot
            .model
            .as_ref()
            .ok_or_else(|| EstimatorError::Unavailable(slot.target.name().to_string()))?;

        let features = model
            .feature_names()
            .iter()
            .map(|field| {
                reading
                    .measurement(*field)
                    .value()
                    .ok_or(EstimatorError::InputIncomplete(field.key()))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let raw = model.predict(&features)?;
        if !raw.is_finite() {
            return Err(EstimatorError::Model(format!("non-finite prediction {}", raw)));
        }
        Ok(round3(raw))
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Measurement;
    use std::io::Write;

    /// records the feature vector it was called with
    struct Echo {
        features: Vec<Field>,
        seen: parking_lot::Mutex<Vec<Vec<f64>>>,
        output: f64,
    }

    impl Estimator for Echo {
        fn feature_names(&self) -> &[Field] {
            &self.features
        }

        fn predict(&self, features: &[f64]) -> Result<f64, EstimatorError> {
            self.seen.lock().push(features.to_vec());
            Ok(self.output)
        }
    }

    fn full_reading() -> Reading {
        Reading {
            ph: Measurement::Value(7.0),
            ec: Measurement::Value(0.8),
            tds: Measurement::Value(0.4),
            dissolved_oxygen: Measurement::Value(1.5),
            temp: Measurement::Value(20.0),
            ..Default::default()
        }
    }

    fn arsenic_model() -> LinearModel {
        LinearModel::new(
            Target::Arsenic,
            vec![Field::Tds, Field::Ec, Field::Temp],
            vec![10.0, 2.0, 0.1],
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn test_linear_prediction_is_rounded() {
        let gateway = EstimatorGateway::new(
            Some(Arc::new(
                LinearModel::new(
                    Target::Arsenic,
                    vec![Field::Tds, Field::Ec, Field::Temp],
                    vec![1.0 / 3.0, 0.0, 0.0],
                    0.0,
                )
                .unwrap(),
            )),
            None,
        );
        let mut reading = full_reading();
        reading.tds = Measurement::Value(1.0);

        let out = gateway.estimate(reading);
        assert_eq!(out.arsenic, Some(0.333));
        assert_eq!(out.barium, None);
    }

    #[test]
    fn test_features_follow_model_order() {
        let echo = Arc::new(Echo {
            features: vec![Field::Temp, Field::Tds, Field::Ec],
            seen: parking_lot::Mutex::new(Vec::new()),
            output: 2.5,
        });
        let gateway = EstimatorGateway::new(Some(echo.clone()), None);

        let out = gateway.estimate(full_reading());
        assert_eq!(out.arsenic, Some(2.5));
        assert_eq!(echo.seen.lock().as_slice(), &[vec![20.0, 0.4, 0.8]]);
    }

    #[test]
    fn test_missing_temp_blocks_both_estimators() {
        let echo = Arc::new(Echo {
            features: Target::Barium.required_inputs().to_vec(),
            seen: parking_lot::Mutex::new(Vec::new()),
            output: 9.0,
        });
        let gateway = EstimatorGateway::new(Some(Arc::new(arsenic_model())), Some(echo.clone()));

        let mut reading = full_reading();
        reading.temp = Measurement::Missing;
        let out = gateway.estimate(reading);

        assert_eq!(out.arsenic, None);
        assert_eq!(out.barium, None);
        assert!(echo.seen.lock().is_empty(), "model must not be invoked");
    }

    #[test]
    fn test_rejected_input_counts_as_missing() {
        let gateway = EstimatorGateway::new(Some(Arc::new(arsenic_model())), None);
        let mut reading = full_reading();
        reading.ec = Measurement::Rejected;
        assert_eq!(gateway.estimate(reading).arsenic, None);
    }

    #[test]
    fn test_barium_needs_ph_and_do() {
        let echo = Arc::new(Echo {
            features: Target::Barium.required_inputs().to_vec(),
            seen: parking_lot::Mutex::new(Vec::new()),
            output: 0.1234,
        });
        let gateway = EstimatorGateway::new(Some(Arc::new(arsenic_model())), Some(echo));

        let mut reading = full_reading();
        reading.dissolved_oxygen = Measurement::Missing;
        let out = gateway.estimate(reading);
        assert!(out.arsenic.is_some());
        assert_eq!(out.barium, None);

        let out = gateway.estimate(full_reading());
        assert_eq!(out.barium, Some(0.123));
    }

    #[test]
    fn test_disabled_gateway_passes_reading_through() {
        let gateway = EstimatorGateway::disabled();
        let reading = full_reading();
        assert_eq!(gateway.estimate(reading.clone()), reading);
        assert!(!gateway.is_available(Target::Arsenic));
    }

    #[test]
    fn test_model_must_match_required_inputs() {
        let err = LinearModel::new(
            Target::Arsenic,
            vec![Field::Tds, Field::Ec],
            vec![1.0, 1.0],
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, EstimatorError::Model(_)));

        let err = LinearModel::new(
            Target::Arsenic,
            vec![Field::Tds, Field::Ec, Field::Temp],
            vec![1.0],
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, EstimatorError::Model(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"feature_names": ["TDS", "EC", "Temp"], "coefficients": [1.0, 1.0, 1.0], "intercept": 0.5}}"#
        )
        .unwrap();

        let model = LinearModel::load(Target::Arsenic, file.path()).unwrap();
        assert_eq!(model.predict(&[1.0, 2.0, 3.0]).unwrap(), 6.5);

        let missing = LinearModel::load(Target::Arsenic, "/nonexistent/arsenic.json");
        assert!(matches!(missing, Err(EstimatorError::Unavailable(_))));
    }

    #[test]
    fn test_from_config_tolerates_missing_files() {
        let config = EstimatorsConfig {
            arsenic_model: Some("/nonexistent/arsenic.json".into()),
            barium_model: None,
        };
        let gateway = EstimatorGateway::from_config(&config);
        assert!(!gateway.is_available(Target::Arsenic));
        assert!(!gateway.is_available(Target::Barium));
    }
}
