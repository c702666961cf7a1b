use crate::core::classifier::TrainedClassifier;
use crate::types::{LandCoverClass, SampleRow, CLASS_COUNT};
use serde::{Deserialize, Serialize};

/// Counts of (actual, predicted) class pairs over the fixed enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// counts[actual][predicted]
    counts: [[u64; CLASS_COUNT]; CLASS_COUNT],
}

impl ConfusionMatrix {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (LandCoverClass, LandCoverClass)>,
    {
        let mut counts = [[0u64; CLASS_COUNT]; CLASS_COUNT];
        for (actual, predicted) in pairs {
            counts[actual.index()][predicted.index()] += 1;
        }
        Self { counts }
    }

    pub fn counts(&self) -> &[[u64; CLASS_COUNT]; CLASS_COUNT] {
        &self.counts
    }

    pub fn count(&self, actual: LandCoverClass, predicted: LandCoverClass) -> u64 {
        self.counts[actual.index()][predicted.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn trace(&self) -> u64 {
        (0..CLASS_COUNT).map(|k| self.counts[k][k]).sum()
    }

    /// Samples per actual class
    pub fn row_totals(&self) -> [u64; CLASS_COUNT] {
        self.counts.map(|row| row.iter().sum())
    }

    /// Samples per predicted class
    pub fn column_totals(&self) -> [u64; CLASS_COUNT] {
        let mut totals = [0u64; CLASS_COUNT];
        for row in &self.counts {
            for (t, v) in totals.iter_mut().zip(row) {
                *t += v;
            }
        }
        totals
    }

    /// Overall accuracy trace / total, 0 for an empty matrix
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.trace() as f64 / total as f64
    }

    /// Cohen's kappa: (p_o - p_e) / (1 - p_e) with p_e from the marginals.
    ///
    /// An empty matrix gives 0; p_e = 1 (all samples in one class, all
    /// predicted as that class) gives 1.
    pub fn kappa(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let n = total as f64;
        let observed = self.trace() as f64 / n;
        let expected: f64 = self
            .row_totals()
            .iter()
            .zip(self.column_totals().iter())
            .map(|(&r, &c)| (r as f64 / n) * (c as f64 / n))
            .sum();
        if (1.0 - expected).abs() < f64::EPSILON {
            return 1.0;
        }
        (observed - expected) / (1.0 - expected)
    }

    /// Correct / actual per class (recall), 0 where a class has no samples
    pub fn producers_accuracy(&self) -> [f64; CLASS_COUNT] {
        let rows = self.row_totals();
        std::array::from_fn(|k| ratio(self.counts[k][k], rows[k]))
    }

    /// Correct / predicted per class (precision), 0 where a class was never predicted
    pub fn consumers_accuracy(&self) -> [f64; CLASS_COUNT] {
        let cols = self.column_totals();
        std::array::from_fn(|k| ratio(self.counts[k][k], cols[k]))
    }

    /// Per-class F1 score
    pub fn fscore(&self) -> [f64; CLASS_COUNT] {
        let producers = self.producers_accuracy();
        let consumers = self.consumers_accuracy();
        std::array::from_fn(|k| {
            let sum = producers[k] + consumers[k];
            if sum == 0.0 {
                0.0
            } else {
                2.0 * producers[k] * consumers[k] / sum
            }
        })
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Which samples a report was computed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationKind {
    /// Scored on the training samples: measures fit quality only
    Resubstitution,
    /// Scored on samples withheld from training: estimates generalisation
    Holdout,
}

impl ValidationKind {
    pub fn description(self) -> &'static str {
        match self {
            ValidationKind::Resubstitution => "fit quality on training samples (not a generalisation estimate)",
            ValidationKind::Holdout => "accuracy on held-out samples",
        }
    }
}

/// Confusion matrix with the sample set it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub kind: ValidationKind,
    pub sample_count: usize,
    pub matrix: ConfusionMatrix,
}

impl ValidationReport {
    pub fn accuracy(&self) -> f64 {
        self.matrix.accuracy()
    }

    pub fn kappa(&self) -> f64 {
        self.matrix.kappa()
    }
}

/// Scores a trained classifier against labeled samples
pub struct Validator;

impl Validator {
    pub fn validate(model: &TrainedClassifier, samples: &[SampleRow], kind: ValidationKind) -> ValidationReport {
        let matrix = ConfusionMatrix::from_pairs(samples.iter().map(|s| (s.class, model.predict(&s.features))));
        let report = ValidationReport { kind, sample_count: samples.len(), matrix };
        log::info!(
            "Validation ({}): {} samples, accuracy {:.4}, kappa {:.4}",
            kind.description(),
            report.sample_count,
            report.accuracy(),
            report.kappa()
        );
        report
    }

    /// Score on the samples the model was trained on
    pub fn resubstitution(model: &TrainedClassifier, training: &[SampleRow]) -> ValidationReport {
        Self::validate(model, training, ValidationKind::Resubstitution)
    }

    /// Score on samples the model never saw
    pub fn holdout(model: &TrainedClassifier, withheld: &[SampleRow]) -> ValidationReport {
        Self::validate(model, withheld, ValidationKind::Holdout)
    }
}
