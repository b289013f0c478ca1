/// Easing curve applied to a tween's normalised progress.
#[derive(Clone, Copy, Debug, Default)]
pub enum Easing {
    #[default]
    Linear,
    EaseInQuad,
    EaseOutQuad,
    EaseInOutQuad,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
    Custom(fn(f32) -> f32),
}

impl Easing {
    /// Map `t` in `[0, 1]` onto the curve.
    pub fn apply(self, t: f32) -> f32 {
        match self {
            Easing::Linear => t,
            Easing::EaseInQuad => t * t,
            Easing::EaseOutQuad => t * (2.0 - t),
            Easing::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Easing::EaseInCubic => t * t * t,
            Easing::EaseOutCubic => {
                let u = t - 1.0;
                u * u * u + 1.0
            }
            Easing::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    (t - 1.0) * (2.0 * t - 2.0) * (2.0 * t - 2.0) + 1.0
                }
            }
            Easing::Custom(f) => f(t),
        }
    }

    /// Look up a curve by its conventional camel-case name. Unknown names fall back to linear.
    pub fn by_name(name: &str) -> Self {
        match name {
            "easeInQuad" => Easing::EaseInQuad,
            "easeOutQuad" => Easing::EaseOutQuad,
            "easeInOutQuad" => Easing::EaseInOutQuad,
            "easeInCubic" => Easing::EaseInCubic,
            "easeOutCubic" => Easing::EaseOutCubic,
            "easeInOutCubic" => Easing::EaseInOutCubic,
            _ => Easing::Linear,
        }
    }
}

impl PartialEq for Easing {
    /// Custom curves compare by function address.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Easing::Custom(a), Easing::Custom(b)) => *a as usize == *b as usize,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}
