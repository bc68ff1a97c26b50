//! Explicit feature map approximating additive homogeneous kernels.
//!
//! Each non-negative component `x` is expanded into `2n + 1` values so that the
//! dot product of two mapped vectors approximates the chosen kernel (chi²,
//! intersection or Jensen-Shannon) between the original vectors. The map
//! samples the kernel spectrum at `n + 1` frequencies spaced `L = 2π / period`
//! apart; the rectangular window smooths the spectrum before sampling.
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KernelType {
    Intersection,
    Chi2,
    JensenShannon,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    Uniform,
    Rectangular,
}

const SMOOTHING_EPSILON: f64 = 1e-2;
const SMOOTHING_STEPS: f64 = 1024.0;

impl KernelType {
    /// Spectrum `κ(λ)` of the kernel signature.
    fn spectrum(&self, lambda: f64) -> f64 {
        match self {
            KernelType::Chi2 => sech(PI * lambda),
            KernelType::Intersection => (2.0 / PI) / (1.0 + 4.0 * lambda * lambda),
            KernelType::JensenShannon => {
                (2.0 / 4f64.ln()) * sech(PI * lambda) / (1.0 + 4.0 * lambda * lambda)
            }
        }
    }

    /// Sampling period tuned per kernel, window and order.
    fn default_period(&self, window: WindowType, order: usize) -> f64 {
        let n = order as f64;
        let period = match (window, self) {
            (WindowType::Uniform, KernelType::Chi2) => 5.86 * n.sqrt() + 3.65,
            (WindowType::Uniform, KernelType::JensenShannon) => 6.64 * n.sqrt() + 7.24,
            (WindowType::Uniform, KernelType::Intersection) => 2.38 * (n + 0.8).ln() + 5.6,
            (WindowType::Rectangular, KernelType::Chi2) => 8.80 * (n + 4.44).sqrt() - 12.6,
            (WindowType::Rectangular, KernelType::JensenShannon) => 9.63 * (n + 1.0).sqrt() - 2.93,
            (WindowType::Rectangular, KernelType::Intersection) => 2.00 * (n + 0.99).ln() + 3.52,
        };
        period.max(1.0)
    }
}

fn sech(x: f64) -> f64 {
    1.0 / x.cosh()
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        x.sin() / x
    }
}

#[derive(Debug, Clone)]
pub struct HomogeneousKernelMap {
    kernel: KernelType,
    window: WindowType,
    order: usize,
    period: f64,
    /// `√(L κ̂(0))` followed by `√(2 L κ̂(jL))` for `j = 1..=order`.
    coefficients: Vec<f64>,
}

impl HomogeneousKernelMap {
    pub fn new(kernel: KernelType, window: WindowType, order: usize) -> Self {
        let period = kernel.default_period(window, order);
        Self::with_period(kernel, window, order, period)
    }

    pub fn with_period(kernel: KernelType, window: WindowType, order: usize, period: f64) -> Self {
        let period = period.max(1.0);
        let l = 2.0 * PI / period;
        let mut map = Self {
            kernel,
            window,
            order,
            period,
            coefficients: Vec::with_capacity(order + 1),
        };
        for j in 0..=order {
            let kappa = map.smooth_spectrum(j as f64 * l);
            let weight = if j == 0 { l * kappa } else { 2.0 * l * kappa };
            map.coefficients.push(weight.max(0.0).sqrt());
        }
        log::trace!(
            "Kernel map {:?}/{:?} order {} period {:.3}: {:?}",
            kernel,
            window,
            order,
            period,
            map.coefficients
        );
        map
    }

    fn smooth_spectrum(&self, omega: f64) -> f64 {
        match self.window {
            WindowType::Uniform => self.kernel.spectrum(omega),
            WindowType::Rectangular => {
                let range = 2.0 / (self.period * SMOOTHING_EPSILON);
                let step = 2.0 * range / (2.0 * SMOOTHING_STEPS + 1.0);
                let mut kappa = 0.0;
                let mut omega_p = -range;
                while omega_p <= range {
                    let window = sinc(self.period / 2.0 * omega_p) * self.period / (2.0 * PI);
                    kappa += window * self.kernel.spectrum(omega_p + omega);
                    omega_p += step;
                }
                (kappa * step).max(0.0)
            }
        }
    }

    pub fn kernel(&self) -> KernelType {
        self.kernel
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    /// Number of output values per input component.
    pub fn dimension_multiplier(&self) -> usize {
        2 * self.order + 1
    }

    /// Map a single component. Zero (and negative) inputs map to zeros.
    pub fn map_value(&self, x: f64, out: &mut Vec<f64>) {
        if x <= 0.0 || !x.is_finite() {
            out.extend(std::iter::repeat(0.0).take(self.dimension_multiplier()));
            return;
        }
        let l = 2.0 * PI / self.period;
        let root = x.sqrt();
        let log_x = x.ln();
        out.push(root * self.coefficients[0]);
        for j in 1..=self.order {
            let angle = j as f64 * l * log_x;
            let scale = root * self.coefficients[j];
            out.push(scale * angle.cos());
            out.push(scale * angle.sin());
        }
    }

    pub fn map(&self, values: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(values.len() * self.dimension_multiplier());
        for &x in values {
            self.map_value(x, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_output_length() {
        let map = HomogeneousKernelMap::new(KernelType::Chi2, WindowType::Rectangular, 1);
        assert_eq!(map.dimension_multiplier(), 3);
        assert_eq!(map.map(&[0.1, 0.2, 0.0, 0.7]).len(), 12);
    }

    #[test]
    fn test_zero_maps_to_zeros() {
        let map = HomogeneousKernelMap::new(KernelType::Intersection, WindowType::Uniform, 2);
        assert_eq!(map.map(&[0.0]), vec![0.0; 5]);
    }

    #[test]
    fn test_chi2_approximation() {
        let map = HomogeneousKernelMap::new(KernelType::Chi2, WindowType::Uniform, 3);
        for (x, y) in [(0.3, 0.5), (0.2, 0.2), (0.05, 0.08)] {
            let exact = 2.0 * x * y / (x + y);
            let approx = dot(&map.map(&[x]), &map.map(&[y]));
            assert!((approx - exact).abs() < 0.02 * exact.max(0.1), "{} vs {}", approx, exact);
        }
    }

    #[test]
    fn test_rectangular_coefficients_are_finite() {
        for kernel in [KernelType::Chi2, KernelType::Intersection, KernelType::JensenShannon] {
            let map = HomogeneousKernelMap::new(kernel, WindowType::Rectangular, 2);
            assert!(map.period() >= 1.0);
            let mapped = map.map(&[0.4]);
            assert!(mapped.iter().all(|v| v.is_finite()));
            assert!(mapped[0] > 0.0);
        }
    }

    #[test]
    fn test_kernel_serde_names() {
        assert_eq!(serde_json::to_string(&KernelType::JensenShannon).unwrap(), "\"jensen_shannon\"");
        let window: WindowType = serde_json::from_str("\"rectangular\"").unwrap();
        assert_eq!(window, WindowType::Rectangular);
    }
}
