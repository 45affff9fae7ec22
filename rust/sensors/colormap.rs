//! Scalar-to-color mapping for point layers.

use std::rc::Rc;

/// Maps a value normalized to `[0, 1]` to linear RGB in `[0, 1]`.
pub type ColorMap = Rc<dyn Fn(f32) -> [f32; 3]>;

/// The default map, same gradient the lidar samples use for cluster ids.
pub fn turbo() -> ColorMap {
    Rc::new(|t: f32| {
        let (r, g, b) = colorous::TURBO
            .eval_continuous(t.clamp(0.0, 1.0) as f64)
            .as_tuple();
        [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
    })
}

pub fn grayscale() -> ColorMap {
    Rc::new(|t: f32| {
        let t = t.clamp(0.0, 1.0);
        [t, t, t]
    })
}

/// Position of `value` in `[min, max]`, clamped. A degenerate range maps
/// everything to 0.
pub fn normalize(value: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if !span.is_finite() || span.abs() <= f32::EPSILON || !value.is_finite() {
        return 0.0;
    }
    ((value - min) / span).clamp(0.0, 1.0)
}

/// Unpacks the PCL packed color convention: the 4 bytes of a float32 field
/// hold `0xAARRGGBB` in the message's byte order.
pub fn unpack_rgba(bytes: [u8; 4], big_endian: bool) -> [f32; 4] {
    let packed = if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    };
    let channel = |shift: u32| ((packed >> shift) & 0xff) as f32 / 255.0;
    [channel(16), channel(8), channel(0), channel(24)]
}
