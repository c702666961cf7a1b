//! Multi-class support vector classifier
//!
//! C-SVC trained with SMO (second-order working set selection) for every
//! pair of classes, combined by one-vs-one voting. Training and prediction
//! are deterministic: identical samples and parameters give identical models.

use crate::core::indices::IndexStack;
use crate::core::region::{AnalysisGrid, Region};
use crate::types::{FeatureVector, LandCoverClass, LulcError, LulcResult, SampleRow, CLASS_NODATA};
use ndarray::{Array2, Zip};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const TAU: f64 = 1e-12;

/// Kernel function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KernelType {
    /// exp(-gamma * |x - y|^2)
    Rbf,
    /// x . y
    Linear,
}

/// Classifier hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    pub kernel: KernelType,
    /// RBF width; larger values fit tighter boundaries around the samples
    pub gamma: f64,
    /// Soft-margin cost C
    pub cost: f64,
    /// Stopping tolerance on the KKT violation
    pub tolerance: f64,
    /// Lower bound on SMO iterations per binary problem
    pub max_iterations: usize,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            kernel: KernelType::Rbf,
            gamma: 0.5,
            cost: 1.0,
            tolerance: 1e-3,
            max_iterations: 10_000_000,
        }
    }
}

impl SvmParams {
    pub(crate) fn validate(&self) -> LulcResult<()> {
        if self.kernel == KernelType::Rbf && !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(LulcError::ClassifierTraining(format!("gamma must be positive, got {}", self.gamma)));
        }
        if !(self.cost.is_finite() && self.cost > 0.0) {
            return Err(LulcError::ClassifierTraining(format!("cost must be positive, got {}", self.cost)));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(LulcError::ClassifierTraining(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    fn kernel(&self, x: &FeatureVector, y: &FeatureVector) -> f64 {
        match self.kernel {
            KernelType::Rbf => {
                let d2: f64 = x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum();
                (-self.gamma * d2).exp()
            }
            KernelType::Linear => x.iter().zip(y).map(|(a, b)| a * b).sum(),
        }
    }
}

/// Decision function separating `positive` from `negative`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BinaryModel {
    positive: LandCoverClass,
    negative: LandCoverClass,
    /// (support vector index, alpha * y)
    coefficients: Vec<(usize, f64)>,
    rho: f64,
}

impl BinaryModel {
    fn decision(&self, kernel_values: &[f64]) -> f64 {
        self.coefficients.iter().map(|&(i, c)| c * kernel_values[i]).sum::<f64>() - self.rho
    }
}

/// Immutable fitted classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelParts")]
pub struct TrainedClassifier {
    params: SvmParams,
    classes: Vec<LandCoverClass>,
    support_vectors: Vec<FeatureVector>,
    models: Vec<BinaryModel>,
}

/// Serialized form of a classifier, checked before it can predict
#[derive(Deserialize)]
struct ModelParts {
    params: SvmParams,
    classes: Vec<LandCoverClass>,
    support_vectors: Vec<FeatureVector>,
    models: Vec<BinaryModel>,
}

impl TryFrom<ModelParts> for TrainedClassifier {
    type Error = LulcError;

    fn try_from(parts: ModelParts) -> LulcResult<Self> {
        let invalid = |msg: String| LulcError::InvalidFormat(format!("Classifier model: {}", msg));

        parts.params.validate().map_err(|e| invalid(e.to_string()))?;
        let k = parts.classes.len();
        if k < 2 {
            return Err(invalid(format!("needs at least 2 classes, got {}", k)));
        }
        if parts.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(format!("classes {:?} are not strictly ascending", parts.classes)));
        }
        if parts.models.len() != k * (k - 1) / 2 {
            return Err(invalid(format!(
                "{} classes need {} pairwise models, got {}",
                k,
                k * (k - 1) / 2,
                parts.models.len()
            )));
        }
        if parts.support_vectors.iter().flatten().any(|v| !v.is_finite()) {
            return Err(invalid("non-finite support vector".to_string()));
        }

        let sv_count = parts.support_vectors.len();
        for model in &parts.models {
            if !parts.classes.contains(&model.positive) || !parts.classes.contains(&model.negative) {
                return Err(invalid(format!(
                    "model {} vs {} refers to a class outside {:?}",
                    model.positive, model.negative, parts.classes
                )));
            }
            if !model.rho.is_finite() {
                return Err(invalid(format!("model {} vs {} has rho {}", model.positive, model.negative, model.rho)));
            }
            if let Some(&(sv, coef)) = model.coefficients.iter().find(|&&(sv, c)| sv >= sv_count || !c.is_finite()) {
                return Err(invalid(format!(
                    "model {} vs {} has coefficient {} on support vector {} of {}",
                    model.positive, model.negative, coef, sv, sv_count
                )));
            }
        }

        Ok(Self {
            params: parts.params,
            classes: parts.classes,
            support_vectors: parts.support_vectors,
            models: parts.models,
        })
    }
}

impl TrainedClassifier {
    pub fn params(&self) -> &SvmParams {
        &self.params
    }

    /// Classes seen in training, ascending
    pub fn classes(&self) -> &[LandCoverClass] {
        &self.classes
    }

    pub fn support_vector_count(&self) -> usize {
        self.support_vectors.len()
    }

    /// One-vs-one decision values in pair order (0,1), (0,2), ..., (k-2,k-1)
    pub fn decision_values(&self, x: &FeatureVector) -> Vec<f64> {
        let kernel_values: Vec<f64> = self.support_vectors.iter().map(|sv| self.params.kernel(sv, x)).collect();
        self.models.iter().map(|m| m.decision(&kernel_values)).collect()
    }

    /// Majority vote over all pairwise models; ties go to the lower label
    pub fn predict(&self, x: &FeatureVector) -> LandCoverClass {
        let mut votes = [0usize; crate::types::CLASS_COUNT];
        for (model, value) in self.models.iter().zip(self.decision_values(x)) {
            let winner = if value > 0.0 { model.positive } else { model.negative };
            votes[winner.index()] += 1;
        }
        let mut best = self.classes[0];
        for &class in &self.classes[1..] {
            if votes[class.index()] > votes[best.index()] {
                best = class;
            }
        }
        best
    }

    /// Label every valid pixel of the stack inside the region
    pub fn classify(&self, stack: &IndexStack, region: &Region) -> ClassifiedRaster {
        let grid = stack.grid().clone();
        let mask = grid.region_mask(region);
        let mut labels = Array2::from_elem(grid.dim(), CLASS_NODATA);

        let kernel = |(row, col): (usize, usize), label: &mut u8, &inside: &bool| {
            if inside {
                if let Some(features) = stack.feature_at(row, col) {
                    *label = self.predict(&features).label();
                }
            }
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut labels).and(&mask).par_for_each(kernel);
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut labels).and(&mask).for_each(kernel);

        let raster = ClassifiedRaster { grid, labels };
        log::info!(
            "Classified {} of {} pixels",
            raster.valid_pixel_count(),
            raster.labels.len()
        );
        raster
    }
}

/// Support vector classifier trainer
pub struct SvmClassifier {
    params: SvmParams,
}

impl SvmClassifier {
    pub fn new(params: SvmParams) -> Self {
        Self { params }
    }

    /// Fit pairwise C-SVC models. Needs at least two samples spanning two classes.
    pub fn train(&self, samples: &[SampleRow]) -> LulcResult<TrainedClassifier> {
        self.params.validate()?;
        log::debug!("Training SVM with {:?}", self.params);

        if samples.len() < 2 {
            return Err(LulcError::ClassifierTraining(format!(
                "At least 2 samples are required, got {}",
                samples.len()
            )));
        }
        if let Some(row) = samples.iter().find(|r| r.features.iter().any(|v| !v.is_finite())) {
            return Err(LulcError::ClassifierTraining(format!(
                "Sample of class {} has non-finite features {:?}",
                row.class, row.features
            )));
        }

        let mut classes: Vec<LandCoverClass> = samples.iter().map(|r| r.class).collect();
        classes.sort();
        classes.dedup();
        if classes.len() < 2 {
            return Err(LulcError::ClassifierTraining(format!(
                "At least 2 distinct classes are required, got {}",
                classes.len()
            )));
        }

        let pairs: Vec<(LandCoverClass, LandCoverClass)> = classes
            .iter()
            .enumerate()
            .flat_map(|(a, &positive)| classes[a + 1..].iter().map(move |&negative| (positive, negative)))
            .collect();

        let solve = |&(positive, negative): &(LandCoverClass, LandCoverClass)| -> LulcResult<PairSolution> {
            let members: Vec<usize> = (0..samples.len())
                .filter(|&i| samples[i].class == positive)
                .chain((0..samples.len()).filter(|&i| samples[i].class == negative))
                .collect();
            let y: Vec<f64> = members
                .iter()
                .map(|&i| if samples[i].class == positive { 1.0 } else { -1.0 })
                .collect();
            let x: Vec<FeatureVector> = members.iter().map(|&i| samples[i].features).collect();
            let solution = self.solve_binary(&x, &y)?;
            Ok(PairSolution { positive, negative, members, y, solution })
        };

        // collected in pair order in both branches
        #[cfg(feature = "parallel")]
        let solved = pairs.par_iter().map(solve).collect::<LulcResult<Vec<_>>>()?;
        #[cfg(not(feature = "parallel"))]
        let solved = pairs.iter().map(solve).collect::<LulcResult<Vec<_>>>()?;

        let mut sv_of_sample: Vec<Option<usize>> = vec![None; samples.len()];
        let mut support_vectors: Vec<FeatureVector> = Vec::new();
        let mut models = Vec::with_capacity(solved.len());

        for pair in solved {
            let mut coefficients = Vec::new();
            for (k, &alpha) in pair.solution.alpha.iter().enumerate() {
                if alpha > 0.0 {
                    let sample = pair.members[k];
                    let sv = *sv_of_sample[sample].get_or_insert_with(|| {
                        support_vectors.push(samples[sample].features);
                        support_vectors.len() - 1
                    });
                    coefficients.push((sv, alpha * pair.y[k]));
                }
            }
            log::debug!(
                "{} vs {}: {} support vectors, rho = {:.6}, {} iterations",
                pair.positive,
                pair.negative,
                coefficients.len(),
                pair.solution.rho,
                pair.solution.iterations
            );
            models.push(BinaryModel {
                positive: pair.positive,
                negative: pair.negative,
                coefficients,
                rho: pair.solution.rho,
            });
        }

        log::info!(
            "Trained SVM on {} samples, {} classes, {} support vectors",
            samples.len(),
            classes.len(),
            support_vectors.len()
        );
        Ok(TrainedClassifier { params: self.params.clone(), classes, support_vectors, models })
    }

    fn solve_binary(&self, x: &[FeatureVector], y: &[f64]) -> LulcResult<BinarySolution> {
        let n = x.len();
        let q = Array2::from_shape_fn((n, n), |(i, j)| y[i] * y[j] * self.params.kernel(&x[i], &x[j]));
        let mut solver = SmoSolver {
            q,
            y: y.to_vec(),
            alpha: vec![0.0; n],
            gradient: vec![-1.0; n],
            cost: self.params.cost,
        };
        let max_iterations = self.params.max_iterations.max(100 * n);

        let mut iterations = 0;
        while let Some((i, j)) = solver.select_working_set(self.params.tolerance) {
            if iterations >= max_iterations {
                log::warn!("SMO reached {} iterations without converging", max_iterations);
                break;
            }
            solver.update_pair(i, j);
            iterations += 1;
        }

        if solver.alpha.iter().any(|a| !a.is_finite()) {
            return Err(LulcError::ClassifierTraining("SMO produced non-finite multipliers".to_string()));
        }
        let rho = solver.rho();
        Ok(BinarySolution { alpha: solver.alpha, rho, iterations })
    }
}

struct BinarySolution {
    alpha: Vec<f64>,
    rho: f64,
    iterations: usize,
}

/// Solved binary problem with the sample indices it was built from
struct PairSolution {
    positive: LandCoverClass,
    negative: LandCoverClass,
    members: Vec<usize>,
    y: Vec<f64>,
    solution: BinarySolution,
}

/// Dual problem: min 1/2 a'Qa - e'a, 0 <= a <= C, y'a = 0
struct SmoSolver {
    q: Array2<f64>,
    y: Vec<f64>,
    alpha: Vec<f64>,
    gradient: Vec<f64>,
    cost: f64,
}

impl SmoSolver {
    fn at_upper(&self, t: usize) -> bool {
        self.alpha[t] >= self.cost
    }

    fn at_lower(&self, t: usize) -> bool {
        self.alpha[t] <= 0.0
    }

    /// Maximal violating index i, then j by second-order gain; `None` once optimal
    fn select_working_set(&self, tolerance: f64) -> Option<(usize, usize)> {
        let n = self.alpha.len();
        let mut gmax = f64::NEG_INFINITY;
        let mut i = None;
        for t in 0..n {
            if self.y[t] > 0.0 {
                if !self.at_upper(t) && -self.gradient[t] >= gmax {
                    gmax = -self.gradient[t];
                    i = Some(t);
                }
            } else if !self.at_lower(t) && self.gradient[t] >= gmax {
                gmax = self.gradient[t];
                i = Some(t);
            }
        }
        let i = i?;

        let mut gmax2 = f64::NEG_INFINITY;
        let mut best_obj = f64::INFINITY;
        let mut j = None;
        for t in 0..n {
            let (grad_diff, quad) = if self.y[t] > 0.0 {
                if self.at_lower(t) {
                    continue;
                }
                gmax2 = gmax2.max(self.gradient[t]);
                (gmax + self.gradient[t], self.q[[i, i]] + self.q[[t, t]] - 2.0 * self.y[i] * self.q[[i, t]])
            } else {
                if self.at_upper(t) {
                    continue;
                }
                gmax2 = gmax2.max(-self.gradient[t]);
                (gmax - self.gradient[t], self.q[[i, i]] + self.q[[t, t]] + 2.0 * self.y[i] * self.q[[i, t]])
            };
            if grad_diff > 0.0 {
                let obj = -(grad_diff * grad_diff) / if quad > 0.0 { quad } else { TAU };
                if obj <= best_obj {
                    best_obj = obj;
                    j = Some(t);
                }
            }
        }

        if gmax + gmax2 < tolerance {
            return None;
        }
        j.map(|j| (i, j))
    }

    fn update_pair(&mut self, i: usize, j: usize) {
        let c = self.cost;
        let (old_i, old_j) = (self.alpha[i], self.alpha[j]);
        let (mut ai, mut aj) = (old_i, old_j);

        if self.y[i] != self.y[j] {
            let quad = positive_or_tau(self.q[[i, i]] + self.q[[j, j]] + 2.0 * self.q[[i, j]]);
            let delta = (-self.gradient[i] - self.gradient[j]) / quad;
            let diff = ai - aj;
            ai += delta;
            aj += delta;
            if diff > 0.0 {
                if aj < 0.0 {
                    aj = 0.0;
                    ai = diff;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = -diff;
            }
            if diff > 0.0 {
                if ai > c {
                    ai = c;
                    aj = c - diff;
                }
            } else if aj > c {
                aj = c;
                ai = c + diff;
            }
        } else {
            let quad = positive_or_tau(self.q[[i, i]] + self.q[[j, j]] - 2.0 * self.q[[i, j]]);
            let delta = (self.gradient[i] - self.gradient[j]) / quad;
            let sum = ai + aj;
            ai -= delta;
            aj += delta;
            if sum > c {
                if ai > c {
                    ai = c;
                    aj = sum - c;
                }
            } else if aj < 0.0 {
                aj = 0.0;
                ai = sum;
            }
            if sum > c {
                if aj > c {
                    aj = c;
                    ai = sum - c;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = sum;
            }
        }

        self.alpha[i] = ai;
        self.alpha[j] = aj;
        let (di, dj) = (ai - old_i, aj - old_j);
        for t in 0..self.gradient.len() {
            self.gradient[t] += self.q[[i, t]] * di + self.q[[j, t]] * dj;
        }
    }

    /// Offset from free multipliers, or the midpoint of the feasible interval
    fn rho(&self) -> f64 {
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut free_sum = 0.0;
        let mut free_count = 0usize;
        for t in 0..self.alpha.len() {
            let yg = self.y[t] * self.gradient[t];
            if self.at_upper(t) {
                if self.y[t] < 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else if self.at_lower(t) {
                if self.y[t] > 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else {
                free_count += 1;
                free_sum += yg;
            }
        }
        if free_count > 0 {
            free_sum / free_count as f64
        } else {
            (upper + lower) / 2.0
        }
    }
}

fn positive_or_tau(v: f64) -> f64 {
    if v > 0.0 {
        v
    } else {
        TAU
    }
}

/// Per-pixel predicted labels, `CLASS_NODATA` outside the region or on no-data
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRaster {
    grid: AnalysisGrid,
    labels: Array2<u8>,
}

impl ClassifiedRaster {
    /// Wrap an existing label grid; every value must be a class label or `CLASS_NODATA`
    pub fn from_labels(grid: AnalysisGrid, labels: Array2<u8>) -> LulcResult<Self> {
        if labels.dim() != grid.dim() {
            return Err(LulcError::Processing(format!(
                "Label grid shape {:?} does not match grid {:?}",
                labels.dim(),
                grid.dim()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l != CLASS_NODATA && LandCoverClass::from_label(l).is_none()) {
            return Err(LulcError::InvalidFormat(format!("Unknown class label {}", bad)));
        }
        Ok(Self { grid, labels })
    }

    pub fn grid(&self) -> &AnalysisGrid {
        &self.grid
    }

    pub fn labels(&self) -> &Array2<u8> {
        &self.labels
    }

    pub fn label_at(&self, row: usize, col: usize) -> Option<LandCoverClass> {
        self.labels.get((row, col)).and_then(|&l| LandCoverClass::from_label(l))
    }

    /// Label of the pixel containing a coordinate
    pub fn sample_at(&self, lon: f64, lat: f64) -> Option<LandCoverClass> {
        let (row, col) = self.grid.locate(lon, lat)?;
        self.label_at(row, col)
    }

    pub fn class_mask(&self, class: LandCoverClass) -> Array2<bool> {
        self.labels.mapv(|l| l == class.label())
    }

    pub fn class_pixel_count(&self, class: LandCoverClass) -> usize {
        self.labels.iter().filter(|&&l| l == class.label()).count()
    }

    pub fn valid_pixel_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l != CLASS_NODATA).count()
    }
}
