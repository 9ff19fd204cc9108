//! Raster element trait for generic cell values

use byteorder::{ByteOrder, NativeEndian};
use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// TIFF SampleFormat codes (tag 339).
pub mod sample_format {
    pub const UINT: u16 = 1;
    pub const INT: u16 = 2;
    pub const IEEEFP: u16 = 3;
}

/// Trait for types that can be stored in a raster cell.
///
/// Besides the numeric bounds, every element knows how it is laid out in a
/// GeoTIFF so the codec can read and write it without a type switch.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// TIFF SampleFormat of this type
    const SAMPLE_FORMAT: u16;

    /// Bits per sample of this type
    const BITS: u16;

    /// Minimum value representable by this type
    fn min_value() -> Self;

    /// Maximum value representable by this type
    fn max_value() -> Self;

    /// Default no-data value for this type
    fn default_nodata() -> Self;

    /// Check if this value represents no-data
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Whether this type is a floating point type
    fn is_float() -> bool;

    /// Encode values into native-endian bytes; `out` holds exactly
    /// `values.len() * BITS / 8` bytes.
    fn write_native(values: &[Self], out: &mut [u8]);

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }

    /// Saturating conversion from f64; NaN maps to `fallback`.
    fn from_f64_or(v: f64, fallback: Self) -> Self {
        if v.is_nan() {
            return fallback;
        }
        let lo = Self::min_value().to_f64().unwrap_or(f64::MIN);
        let hi = Self::max_value().to_f64().unwrap_or(f64::MAX);
        NumCast::from(v.clamp(lo, hi)).unwrap_or(fallback)
    }
}

macro_rules! impl_raster_element_int {
    ($t:ty, $fmt:expr, $write:expr) => {
        impl RasterElement for $t {
            const SAMPLE_FORMAT: u16 = $fmt;
            const BITS: u16 = (std::mem::size_of::<$t>() * 8) as u16;

            fn min_value() -> Self {
                <$t>::MIN
            }

            fn max_value() -> Self {
                <$t>::MAX
            }

            fn default_nodata() -> Self {
                <$t>::MIN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                match nodata {
                    Some(nd) => *self == nd,
                    None => false,
                }
            }

            fn is_float() -> bool {
                false
            }

            fn write_native(values: &[Self], out: &mut [u8]) {
                ($write)(values, out)
            }
        }
    };
}

macro_rules! impl_raster_element_float {
    ($t:ty, $write:expr) => {
        impl RasterElement for $t {
            const SAMPLE_FORMAT: u16 = sample_format::IEEEFP;
            const BITS: u16 = (std::mem::size_of::<$t>() * 8) as u16;

            fn min_value() -> Self {
                <$t>::MIN
            }

            fn max_value() -> Self {
                <$t>::MAX
            }

            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) => (self - nd).abs() < <$t>::EPSILON * 100.0,
                    None => false,
                }
            }

            fn is_float() -> bool {
                true
            }

            fn write_native(values: &[Self], out: &mut [u8]) {
                ($write)(values, out)
            }
        }
    };
}

impl_raster_element_int!(u8, sample_format::UINT, |v: &[u8], out: &mut [u8]| out.copy_from_slice(v));
impl_raster_element_int!(u16, sample_format::UINT, NativeEndian::write_u16_into);
impl_raster_element_int!(i16, sample_format::INT, NativeEndian::write_i16_into);
impl_raster_element_int!(u32, sample_format::UINT, NativeEndian::write_u32_into);
impl_raster_element_int!(i32, sample_format::INT, NativeEndian::write_i32_into);
impl_raster_element_float!(f32, NativeEndian::write_f32_into);
impl_raster_element_float!(f64, NativeEndian::write_f64_into);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiff_layout_constants() {
        assert_eq!(<u8 as RasterElement>::BITS, 8);
        assert_eq!(<u16 as RasterElement>::BITS, 16);
        assert_eq!(<i16 as RasterElement>::SAMPLE_FORMAT, sample_format::INT);
        assert_eq!(<f32 as RasterElement>::SAMPLE_FORMAT, sample_format::IEEEFP);
        assert_eq!(<f64 as RasterElement>::BITS, 64);
    }

    #[test]
    fn test_saturating_from_f64() {
        assert_eq!(u8::from_f64_or(300.0, 0), 255);
        assert_eq!(u8::from_f64_or(-4.0, 0), 0);
        assert_eq!(u16::from_f64_or(f64::NAN, 7), 7);
        assert_eq!(i16::from_f64_or(-9999.0, 0), -9999);
    }

    #[test]
    fn test_write_native() {
        let mut out = [0u8; 4];
        <u16 as RasterElement>::write_native(&[1, 2], &mut out);
        assert_eq!(NativeEndian::read_u16(&out[0..2]), 1);
        assert_eq!(NativeEndian::read_u16(&out[2..4]), 2);
    }

    #[test]
    fn test_float_nodata() {
        assert!(f32::NAN.is_nodata(None));
        assert!((-9999.0f32).is_nodata(Some(-9999.0)));
        assert!(!0.5f32.is_nodata(Some(-9999.0)));
    }
}
