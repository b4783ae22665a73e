//! Calorie model based on the ACSM walking and running equations
//!
//! VO2 is estimated in ml/kg/min from belt speed and grade, converted to
//! kcal at 5 kcal per litre of O2, then scaled by an empirical correction.
//!
//! Incline is taken as true degrees and turned into grade with `tan`.
//! Treadmill consoles usually report percent grade, so this may understate
//! steep inclines; the behaviour is kept as-is for numeric compatibility.

/// Upper speed bound (inclusive) of the walking equation, km/h
pub const WALK_RUN_THRESHOLD_KPH: f64 = 6.0;

/// Empirical scale applied to the ACSM estimate
pub const DEFAULT_CORRECTION_FACTOR: f64 = 0.8;

/// Resting oxygen uptake, ml/kg/min (1 MET)
const RESTING_VO2: f64 = 3.5;

/// kcal released per litre of O2 consumed
const KCAL_PER_LITRE_O2: f64 = 5.0;

/// Which ACSM equation applies at a given speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gait {
    Walking,
    Running,
}

/// Parameters of the calorie estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalorieModel {
    /// Speeds at or below this use the walking equation
    pub walk_run_threshold_kph: f64,
    pub correction_factor: f64,
}

impl Default for CalorieModel {
    fn default() -> Self {
        Self {
            walk_run_threshold_kph: WALK_RUN_THRESHOLD_KPH,
            correction_factor: DEFAULT_CORRECTION_FACTOR,
        }
    }
}

impl CalorieModel {
    pub fn with_correction_factor(correction_factor: f64) -> Self {
        Self {
            correction_factor,
            ..Self::default()
        }
    }

    pub fn gait(&self, speed_kph: f64) -> Gait {
        if speed_kph <= self.walk_run_threshold_kph {
            Gait::Walking
        } else {
            Gait::Running
        }
    }

    /// Oxygen uptake in ml/kg/min
    pub fn vo2(&self, speed_kph: f64, incline_deg: f64) -> f64 {
        let speed_m_min = speed_kph * 1000.0 / 60.0;
        let grade = incline_deg.to_radians().tan();

        match self.gait(speed_kph) {
            Gait::Walking => RESTING_VO2 + 0.1 * speed_m_min + 1.8 * speed_m_min * grade,
            Gait::Running => RESTING_VO2 + 0.2 * speed_m_min + 0.9 * speed_m_min * grade,
        }
    }

    /// Kilocalories burned over `duration_secs` at constant speed and incline
    ///
    /// Returns 0 for non-positive durations.
    pub fn kcal(
        &self,
        weight_kg: f64,
        speed_kph: f64,
        incline_deg: f64,
        duration_secs: f64,
    ) -> f64 {
        if duration_secs <= 0.0 {
            return 0.0;
        }

        let kcal_per_min =
            self.vo2(speed_kph, incline_deg) * weight_kg / 1000.0 * KCAL_PER_LITRE_O2;
        kcal_per_min * (duration_secs / 60.0) * self.correction_factor
    }

    /// Burn rate in kcal per hour
    pub fn kcal_per_hour(&self, weight_kg: f64, speed_kph: f64, incline_deg: f64) -> f64 {
        self.kcal(weight_kg, speed_kph, incline_deg, 3600.0)
    }
}

/// Calorie estimate with the default model
pub fn calculate_calories(
    weight_kg: f64,
    speed_kph: f64,
    incline_deg: f64,
    duration_secs: f64,
) -> f64 {
    CalorieModel::default().kcal(weight_kg, speed_kph, incline_deg, duration_secs)
}
