use crate::common::Error;
use aligned_vec::{AVec, ConstAlign};
use std::ops::{Index, IndexMut};

const ALIGN: usize = 64;

/// Dense 3D array in x-fastest order, index is `(z * height + y) * width + x`.
///
/// 2D images are stored with `depth == 1`.
#[derive(Debug, Clone)]
pub struct Array3D<T> {
    pub data: AVec<T, ConstAlign<ALIGN>>,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl<T> Array3D<T> {
    pub fn from_slice(data: &[T], width: usize, height: usize, depth: usize) -> Result<Self, Error>
    where
        T: Clone,
    {
        if data.len() != width * height * depth {
            return Err(Error::DimensionMismatch {
                len: data.len(),
                shape: [width, height, depth],
            });
        }
        Ok(Self {
            width,
            height,
            depth,
            data: AVec::from_slice(ALIGN, data),
        })
    }

    /// Promotes a 2D image to a volume of depth 1.
    pub fn from_slice_2d(data: &[T], width: usize, height: usize) -> Result<Self, Error>
    where
        T: Clone,
    {
        Self::from_slice(data, width, height, 1)
    }

    /// Creates array from shape given as `[width, height]` or `[width, height, depth]`.
    pub fn from_shape(data: &[T], shape: &[usize]) -> Result<Self, Error>
    where
        T: Clone,
    {
        match *shape {
            [width, height] => Self::from_slice_2d(data, width, height),
            [width, height, depth] => Self::from_slice(data, width, height, depth),
            _ => Err(Error::UnsupportedRank(shape.len())),
        }
    }

    pub fn from_fill(value: T, width: usize, height: usize, depth: usize) -> Self
    where
        T: Clone + Copy,
    {
        let data: AVec<T, ConstAlign<ALIGN>> =
            AVec::from_iter(ALIGN, (0..width * height * depth).map(|_| value));
        Self {
            width,
            height,
            depth,
            data,
        }
    }

    pub fn from_iter<I>(iter: I, width: usize, height: usize, depth: usize) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
    {
        let data = AVec::from_iter(ALIGN, iter);
        if data.len() != width * height * depth {
            return Err(Error::DimensionMismatch {
                len: data.len(),
                shape: [width, height, depth],
            });
        }
        Ok(Self {
            width,
            height,
            depth,
            data,
        })
    }

    #[inline(always)]
    pub fn shape(&self) -> [usize; 3] {
        [self.width, self.height, self.depth]
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn get_index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(
            x < self.width && y < self.height && z < self.depth,
            "Index ({x}, {y}, {z}) is out of bounds ({}, {}, {})",
            self.width,
            self.height,
            self.depth
        );
        (z * self.height + y) * self.width + x
    }

    pub fn get_xyz_index(&self, ind: usize) -> (usize, usize, usize) {
        debug_assert!(ind < self.data.len());
        let x = ind % self.width;
        let y = (ind / self.width) % self.height;
        let z = ind / (self.width * self.height);
        (x, y, z)
    }

    pub fn map<U, F>(&self, f: F) -> Array3D<U>
    where
        F: Fn(&T) -> U,
    {
        Array3D {
            data: AVec::from_iter(ALIGN, self.data.iter().map(f)),
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }

    pub fn as_slice(&self) -> &[T] {
        self.data.as_slice()
    }
}

impl<T> Index<(usize, usize, usize)> for Array3D<T> {
    type Output = T;
    fn index(&self, (x, y, z): (usize, usize, usize)) -> &Self::Output {
        &self.data[self.get_index(x, y, z)]
    }
}
impl<T> IndexMut<(usize, usize, usize)> for Array3D<T> {
    fn index_mut(&mut self, (x, y, z): (usize, usize, usize)) -> &mut Self::Output {
        let idx = self.get_index(x, y, z);
        &mut self.data[idx]
    }
}

/// Pixel and voxel sample types accepted by [`Volume::from_samples`].
///
/// Integer samples are divided by the largest value of their type, so 8-bit and 16-bit images
/// land in the same `[0, 1]` range (`[-1, 1]` for signed types). Floats are taken as they are.
pub trait Sample: Copy {
    fn to_intensity(self) -> f64;
}

macro_rules! impl_integer_sample {
    ($($t:ty),*) => {
        $(impl Sample for $t {
            #[inline(always)]
            fn to_intensity(self) -> f64 {
                self as f64 / <$t>::MAX as f64
            }
        })*
    };
}
impl_integer_sample!(u8, u16, u32, i8, i16, i32);

impl Sample for f32 {
    #[inline(always)]
    fn to_intensity(self) -> f64 {
        self as f64
    }
}

impl Sample for f64 {
    #[inline(always)]
    fn to_intensity(self) -> f64 {
        self
    }
}

/// Intensity volume with one or more same-shaped channels and the physical voxel spacing.
///
/// Always holds at least one channel.
#[derive(Debug, Clone)]
pub struct Volume {
    pub(crate) channels: Vec<Array3D<f64>>,
    /// Voxel spacing along x, y and z.
    pub spacing: [f64; 3],
}

impl Volume {
    pub fn new(data: Array3D<f64>) -> Self {
        Self {
            channels: vec![data],
            spacing: [1.0; 3],
        }
    }

    /// Converts pixels of any [`Sample`] type, e.g. `u8` pixels of an 8-bit image become
    /// intensities in `[0, 1]`.
    pub fn from_samples<T: Sample>(samples: &Array3D<T>) -> Self {
        Self::new(samples.map(|v| v.to_intensity()))
    }

    pub fn multichannel(channels: Vec<Array3D<f64>>) -> Result<Self, Error> {
        let Some(first) = channels.first() else {
            return Err(Error::NoChannels);
        };
        let expected = first.shape();
        if let Some((index, other)) = channels
            .iter()
            .enumerate()
            .find(|(_, c)| c.shape() != expected)
        {
            return Err(Error::ChannelShapeMismatch {
                channel: index,
                expected,
                found: other.shape(),
            });
        }
        Ok(Self {
            channels,
            spacing: [1.0; 3],
        })
    }

    pub fn with_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn channels(&self) -> &[Array3D<f64>] {
        &self.channels
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline(always)]
    pub fn shape(&self) -> [usize; 3] {
        self.channels[0].shape()
    }

    #[inline(always)]
    pub fn num_voxels(&self) -> usize {
        self.channels[0].len()
    }

    /// Standard deviation over all samples of all channels (population, like `numpy.std`).
    pub fn std_dev(&self) -> f64 {
        let count = (self.num_voxels() * self.channels.len()) as f64;
        if count == 0.0 {
            return 0.0;
        }
        let mean = self
            .channels
            .iter()
            .flat_map(|c| c.data.iter())
            .sum::<f64>()
            / count;
        let var = self
            .channels
            .iter()
            .flat_map(|c| c.data.iter())
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / count;
        var.sqrt()
    }
}

/// Integer types accepted as seed maps. Output label maps use the caller's type.
pub trait SeedValue: Copy + PartialEq + Send + Sync + 'static {
    fn to_i64(self) -> i64;
    fn from_i64(value: i64) -> Self;
}

macro_rules! impl_seed_value {
    ($($t:ty),*) => {
        $(impl SeedValue for $t {
            #[inline(always)]
            fn to_i64(self) -> i64 {
                self as i64
            }
            #[inline(always)]
            fn from_i64(value: i64) -> Self {
                value as $t
            }
        })*
    };
}
impl_seed_value!(i8, i16, i32, i64, isize, u8, u16, u32);

#[cfg(test)]
mod tests {
    use super::{Array3D, Sample, Volume};
    use crate::common::Error;

    #[test]
    fn index_roundtrip() {
        let arr = Array3D::from_fill(0u8, 4, 3, 2);
        assert_eq!(arr.get_xyz_index(arr.get_index(3, 1, 1)), (3, 1, 1));
        assert_eq!(arr.get_index(1, 0, 0), 1);
        assert_eq!(arr.get_index(0, 1, 0), 4);
        assert_eq!(arr.get_index(0, 0, 1), 12);
    }

    #[test]
    fn shape_checks() {
        assert_eq!(
            Array3D::from_slice(&[0i32; 5], 2, 2, 1).unwrap_err(),
            Error::DimensionMismatch {
                len: 5,
                shape: [2, 2, 1]
            }
        );
        assert_eq!(
            Array3D::from_shape(&[0i32; 8], &[2, 2, 2, 1]).unwrap_err(),
            Error::UnsupportedRank(4)
        );
        let a = Array3D::from_shape(&[0i32; 6], &[3, 2]).unwrap();
        assert_eq!(a.shape(), [3, 2, 1]);
        let b = Array3D::from_iter(0..8u16, 2, 2, 2).unwrap();
        assert_eq!(b[(1, 1, 1)], 7);
        assert!(Array3D::from_iter(0..7u16, 2, 2, 2).is_err());
    }

    #[test]
    fn std_dev_over_channels() {
        let c0 = Array3D::from_slice(&[0.0, 2.0], 2, 1, 1).unwrap();
        let c1 = Array3D::from_slice(&[0.0, 2.0], 2, 1, 1).unwrap();
        let vol = Volume::multichannel(vec![c0, c1]).unwrap();
        assert!((vol.std_dev() - 1.0).abs() < 1e-12);
        let flat = Volume::new(Array3D::from_fill(100.0, 3, 3, 1));
        assert_eq!(flat.std_dev(), 0.0);
    }

    #[test]
    fn multichannel_shape_mismatch() {
        let c0 = Array3D::from_fill(0.0, 2, 2, 1);
        let c1 = Array3D::from_fill(0.0, 2, 2, 1);
        let c2 = Array3D::from_fill(0.0, 2, 1, 1);
        assert_eq!(
            Volume::multichannel(vec![c0, c1, c2]).unwrap_err(),
            Error::ChannelShapeMismatch {
                channel: 2,
                expected: [2, 2, 1],
                found: [2, 1, 1]
            }
        );
    }

    #[test]
    fn multichannel_needs_a_channel() {
        assert_eq!(Volume::multichannel(vec![]).unwrap_err(), Error::NoChannels);
        let vol = Volume::multichannel(vec![Array3D::from_fill(1.0, 3, 2, 1)]).unwrap();
        assert_eq!(vol.num_channels(), 1);
        assert_eq!(vol.shape(), [3, 2, 1]);
    }

    #[test]
    fn integer_samples_are_scaled_to_unit_range() {
        assert_eq!(255u8.to_intensity(), 1.0);
        assert_eq!(0u8.to_intensity(), 0.0);
        assert_eq!(u16::MAX.to_intensity(), 1.0);
        assert_eq!(i16::MAX.to_intensity(), 1.0);
        assert!(i8::MIN.to_intensity() < -1.0 + 1e-2);
        assert_eq!(0.25f32.to_intensity(), 0.25);
        assert_eq!(300.0f64.to_intensity(), 300.0);

        let samples = Array3D::from_slice(&[0u8, 51, 255], 3, 1, 1).unwrap();
        let vol = Volume::from_samples(&samples);
        assert_eq!(vol.channels()[0].as_slice(), &[0.0, 0.2, 1.0]);
    }
}
