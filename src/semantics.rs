use crate::{
    common::*,
    config::CheckpointConfig,
    error::SynthError,
    raster::{InstanceRaster, LabelRaster},
};

/// Generator input for one tile: one-hot class channels followed by the
/// instance-edge channel, laid out `[channel, y, x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditioningTensor {
    pub data: Array3<f32>,
}

impl ConditioningTensor {
    /// Builds the conditioning input from a label and an instance raster of
    /// the same size.
    pub fn build(
        label: &LabelRaster,
        instance: &InstanceRaster,
        config: &CheckpointConfig,
    ) -> Result<Self, SynthError> {
        if label.size() != instance.size() {
            return Err(SynthError::DimensionMismatch {
                left: "label".into(),
                left_size: label.size(),
                right: "instance".into(),
                right_size: instance.size(),
            });
        }

        let class_count = config.class_count();
        if let Some(max_id) = label.max_id() {
            if max_id as usize >= class_count {
                return Err(SynthError::ClassCountMismatch {
                    found: max_id,
                    expected: class_count,
                });
            }
        }

        let (height, width) = label.size();
        let mut data = Array3::<f32>::zeros((config.semantic_nc(), height, width));

        for ((y, x), &id) in label.ids.indexed_iter() {
            data[[id as usize, y, x]] = 1.0;
        }

        if !config.no_instance {
            let edges = instance_edges(&instance.ids);
            data.index_axis_mut(Axis(0), class_count).assign(&edges);
        }

        Ok(Self { data })
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// `(height, width)`
    pub fn size(&self) -> (usize, usize) {
        let (_, height, width) = self.data.dim();
        (height, width)
    }

    /// Copies the array into a `[1, C, H, W]` float tensor on `device`.
    pub fn to_tensor(&self, device: Device) -> Tensor {
        let (channels, height, width) = self.data.dim();
        let values = self.data.iter().copied().collect::<Vec<f32>>();
        Tensor::of_slice(&values)
            .view([1, channels as i64, height as i64, width as i64])
            .to_device(device)
    }
}

/// Marks pixels whose 4-neighbourhood contains a different instance id.
/// Both pixels on either side of a boundary are marked.
pub fn instance_edges(ids: &Array2<u32>) -> Array2<f32> {
    let (height, width) = ids.dim();
    let mut edges = Array2::<f32>::zeros((height, width));

    for y in 0..height {
        for x in 0..width {
            let id = ids[[y, x]];
            if x + 1 < width && ids[[y, x + 1]] != id {
                edges[[y, x]] = 1.0;
                edges[[y, x + 1]] = 1.0;
            }
            if y + 1 < height && ids[[y + 1, x]] != id {
                edges[[y, x]] = 1.0;
                edges[[y + 1, x]] = 1.0;
            }
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn config(text: &str) -> CheckpointConfig {
        json5::from_str(text).unwrap()
    }

    #[test]
    fn channel_count_matches_configuration() {
        let label = LabelRaster::new(array![[0, 1, 2], [2, 1, 0]]);
        let instance = InstanceRaster::new(Array2::zeros((2, 3)));

        for (text, channels) in [
            ("{ label_nc: 3 }", 4),
            ("{ label_nc: 3, no_instance: true }", 3),
            ("{ label_nc: 3, contain_dontcare_label: true }", 5),
            ("{ label_nc: 7 }", 8),
        ] {
            let config = config(text);
            let cond = ConditioningTensor::build(&label, &instance, &config).unwrap();
            assert_eq!(cond.channels(), channels);
            assert_eq!(cond.channels(), config.semantic_nc());
            assert_eq!(cond.size(), (2, 3));
        }
    }

    #[test]
    fn one_hot_classes() {
        let label = LabelRaster::new(array![[0, 2], [1, 1]]);
        let instance = InstanceRaster::new(Array2::zeros((2, 2)));
        let cond =
            ConditioningTensor::build(&label, &instance, &config("{ label_nc: 3 }")).unwrap();

        assert_eq!(cond.data.index_axis(Axis(0), 0), array![[1_f32, 0.], [0., 0.]]);
        assert_eq!(cond.data.index_axis(Axis(0), 1), array![[0_f32, 0.], [1., 1.]]);
        assert_eq!(cond.data.index_axis(Axis(0), 2), array![[0_f32, 1.], [0., 0.]]);
        // uniform instance map has no edges
        assert_eq!(cond.data.index_axis(Axis(0), 3), Array2::<f32>::zeros((2, 2)));
        // every pixel belongs to exactly one class
        assert_eq!(cond.data.slice(s![0..3, .., ..]).sum(), 4.0);
    }

    #[test]
    fn edges_mark_both_sides_of_a_boundary() {
        let ids = array![[1, 1, 2, 2], [1, 1, 2, 2], [1, 1, 1, 1]];
        let edges = instance_edges(&ids);
        assert_eq!(
            edges,
            array![
                [0_f32, 1., 1., 0.],
                [0., 1., 1., 1.],
                [0., 0., 1., 1.],
            ]
        );
    }

    #[test]
    fn dimension_mismatch() {
        let label = LabelRaster::new(Array2::zeros((4, 4)));
        let instance = InstanceRaster::new(Array2::zeros((4, 5)));
        let err = ConditioningTensor::build(&label, &instance, &config("{ label_nc: 2 }"))
            .unwrap_err();
        assert!(matches!(err, SynthError::DimensionMismatch { .. }));
    }

    #[test]
    fn class_count_mismatch() {
        let label = LabelRaster::new(array![[0, 5]]);
        let instance = InstanceRaster::new(Array2::zeros((1, 2)));

        let err = ConditioningTensor::build(&label, &instance, &config("{ label_nc: 5 }"))
            .unwrap_err();
        assert!(matches!(
            err,
            SynthError::ClassCountMismatch {
                found: 5,
                expected: 5
            }
        ));

        // the don't-care class makes id 5 valid
        let config = config("{ label_nc: 5, contain_dontcare_label: true }");
        assert!(ConditioningTensor::build(&label, &instance, &config).is_ok());
    }

    #[test]
    fn tensor_layout_matches_array() {
        let label = LabelRaster::new(array![[1, 0]]);
        let instance = InstanceRaster::new(array![[3, 4]]);
        let cond =
            ConditioningTensor::build(&label, &instance, &config("{ label_nc: 2 }")).unwrap();

        let tensor = cond.to_tensor(Device::Cpu);
        assert_eq!(tensor.size(), vec![1, 3, 1, 2]);
        assert_eq!(tensor.double_value(&[0, 0, 0, 1]), 1.0);
        assert_eq!(tensor.double_value(&[0, 1, 0, 0]), 1.0);
        assert_eq!(tensor.double_value(&[0, 2, 0, 0]), 1.0);
        assert_eq!(tensor.double_value(&[0, 2, 0, 1]), 1.0);
    }

    #[test]
    fn build_is_deterministic() {
        let label = LabelRaster::new(array![[0, 1], [1, 0]]);
        let instance = InstanceRaster::new(array![[1, 2], [2, 2]]);
        let config = config("{ label_nc: 2 }");
        let first = ConditioningTensor::build(&label, &instance, &config).unwrap();
        let second = ConditioningTensor::build(&label, &instance, &config).unwrap();
        assert_eq!(first, second);
    }
}
