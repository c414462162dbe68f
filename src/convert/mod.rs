//! # Convert
//!
//! Piecewise-linear conversion between internal and display field-of-view values

mod table;

pub use table::FOV_TABLE;

/// One calibration point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FovPair {
    /// Value the engine stores
    pub internal: f32,
    /// Value the player sees, in degrees
    pub display: f32,
}
impl FovPair {
    /// Creates a calibration point
    pub const fn new(internal: f32, display: f32) -> Self {
        Self { internal, display }
    }
}

/// Maps `x` from one axis of `table` to the other.
///
/// With `inverse == false` the input is internal and the output display; `true` swaps the roles.
/// Inputs outside the table snap to the first or last entry. An empty table returns `x` unchanged.
///
/// `table` must be strictly increasing on both axes.
pub fn interpolate(table: &[FovPair], x: f32, inverse: bool) -> f32 {
    let (input, output): (fn(&FovPair) -> f32, fn(&FovPair) -> f32) = if inverse {
        (|p: &FovPair| p.display, |p: &FovPair| p.internal)
    } else {
        (|p: &FovPair| p.internal, |p: &FovPair| p.display)
    };

    let (first, last) = match (table.first(), table.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return x,
    };
    if x <= input(first) {
        return output(first);
    }
    if x >= input(last) {
        return output(last);
    }

    table
        .windows(2)
        .find(|pair| x <= input(&pair[1]))
        .map(|pair| {
            let (lo, hi) = (&pair[0], &pair[1]);
            let t = (x - input(lo)) / (input(hi) - input(lo));
            output(lo) + t * (output(hi) - output(lo))
        })
        // only NaN gets here
        .unwrap_or_else(|| output(last))
}

/// Converts between internal and display field of view using [`FOV_TABLE`]
pub fn convert_format(x: f32, inverse: bool) -> f32 {
    interpolate(&FOV_TABLE, x, inverse)
}
