use crate::arrays::{Array3D, SeedValue};
use crate::solver::ProbabilityMatrix;

/// Builds the output label map from the caller's seeds.
///
/// Every unknown gets the original value of its most probable class. All other voxels, seeds,
/// isolated seeds, excluded and unreachable voxels, keep their input value.
pub fn compose_labels<S: SeedValue>(
    seeds: &Array3D<S>,
    unlabeled: &[usize],
    probabilities: &ProbabilityMatrix,
    class_values: &[i64],
) -> Array3D<S> {
    assert_eq!(unlabeled.len(), probabilities.num_unlabeled);
    assert_eq!(class_values.len(), probabilities.num_classes);
    let mut out = seeds.clone();
    for (v, voxel) in unlabeled.iter().enumerate() {
        out.data[*voxel] = S::from_i64(class_values[probabilities.argmax(v)]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::compose_labels;
    use crate::arrays::Array3D;
    use crate::solver::ProbabilityMatrix;

    #[test]
    fn scatters_original_class_values() {
        let seeds = Array3D::from_slice_2d(&[9i8, 0, -1, 0, 4], 5, 1).unwrap();
        let p = ProbabilityMatrix::from_rows(vec![vec![0.9, 0.1], vec![0.1, 0.9]], 2);
        let out = compose_labels(&seeds, &[1, 3], &p, &[4, 9]);
        assert_eq!(out.as_slice(), &[9, 4, -1, 9, 4]);
    }
}
