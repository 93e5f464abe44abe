//! Isothermal Euler equations for natural gas pipes.
//!
//! Conserved variables are density `ρ` (kg/m³) and normal volume flow `q`
//! (m³/s at normal conditions). With cross section `A` and normal density
//! `ρ₀`:
//!
//! ```text
//! ∂ₜ(ρ, q) + ∂ₓ F(ρ, q) = S(ρ, q)
//! F(ρ, q) = ( ρ₀/A · q,  A/ρ₀ · p(ρ) + ρ₀/A · q²/ρ )
//! S(ρ, q) = ( 0,  -λ ρ₀ / (2 A D) · |q| q / ρ )
//! p(ρ)    = c² ρ / (1 - α c² ρ)
//! ```
//!
//! The pressure law is a virial approximation of the real-gas factor with
//! a linear compressibility in pressure.

/// Pascal per bar.
pub const BAR: f64 = 1e5;
/// Density at normal conditions (kg/m³).
pub const RHO_0: f64 = 0.785;
/// Normal temperature (K).
pub const T_0: f64 = 273.15;
/// Gas temperature (K).
pub const T: f64 = 283.15;
/// Critical temperature (K).
pub const T_CRIT: f64 = 192.0;
/// Critical pressure (bar).
pub const P_CRIT: f64 = 46.4;
/// Normal pressure (Pa).
pub const P_0: f64 = 1.01325 * BAR;
/// Compressibility at normal conditions.
pub const Z_0: f64 = 1.005;

/// Squared speed of sound in the ideal-gas limit (m²/s²).
pub fn c_vac_squared() -> f64 {
    P_0 * T / (Z_0 * T_0 * RHO_0)
}

/// Compressibility coefficient of the pressure law (1/Pa).
pub fn alpha() -> f64 {
    (0.257 / P_CRIT - 0.533 * T_CRIT / (P_CRIT * T)) / BAR
}

/// Pressure in Pa.
pub fn pressure(rho: f64) -> f64 {
    let c2 = c_vac_squared();
    c2 * rho / (1.0 - alpha() * c2 * rho)
}

pub fn d_pressure_d_rho(rho: f64) -> f64 {
    let c2 = c_vac_squared();
    let denominator = 1.0 - alpha() * c2 * rho;
    c2 / (denominator * denominator)
}

/// Inverse of [`pressure`].
pub fn rho_from_pressure(p: f64) -> f64 {
    p / (c_vac_squared() * (1.0 + alpha() * p))
}

/// Fully turbulent friction factor after Nikuradse.
pub fn nikuradse(diameter: f64, roughness: f64) -> f64 {
    let denominator = 2.0 * (diameter / roughness).log10() + 1.138;
    1.0 / (denominator * denominator)
}

/// Flux, source and their derivatives for one pipe geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsothermalEuler {
    area: f64,
    diameter: f64,
    friction: f64,
}

impl IsothermalEuler {
    pub fn new(diameter: f64, friction: f64) -> Self {
        Self {
            area: std::f64::consts::PI * diameter * diameter / 4.0,
            diameter,
            friction,
        }
    }

    pub fn friction(&self) -> f64 {
        self.friction
    }

    pub fn flux(&self, rho: f64, q: f64) -> [f64; 2] {
        [
            RHO_0 / self.area * q,
            self.area / RHO_0 * pressure(rho) + RHO_0 / self.area * q * q / rho,
        ]
    }

    /// `[[dF₀/dρ, dF₀/dq], [dF₁/dρ, dF₁/dq]]`
    pub fn d_flux(&self, rho: f64, q: f64) -> [[f64; 2]; 2] {
        [
            [0.0, RHO_0 / self.area],
            [
                self.area / RHO_0 * d_pressure_d_rho(rho) - RHO_0 / self.area * q * q / (rho * rho),
                2.0 * RHO_0 / self.area * q / rho,
            ],
        ]
    }

    fn friction_coefficient(&self) -> f64 {
        self.friction * RHO_0 / (2.0 * self.area * self.diameter)
    }

    pub fn source(&self, rho: f64, q: f64) -> [f64; 2] {
        [0.0, -self.friction_coefficient() * q.abs() * q / rho]
    }

    pub fn d_source(&self, rho: f64, q: f64) -> [[f64; 2]; 2] {
        let k = self.friction_coefficient();
        [
            [0.0, 0.0],
            [k * q.abs() * q / (rho * rho), -2.0 * k * q.abs() / rho],
        ]
    }
}
