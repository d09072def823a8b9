use std::path::Path;

use image::{RgbImage, imageops::FilterType};
use tch::{self, Device, IValue, Kind, Tensor};

use crate::{
    landmarks::{LandmarkSet, Point3},
    model::{LandmarkExtractor, ModelError},
};

/// Square input resolution of the face mesh network.
pub const FACE_MESH_INPUT: i64 = 192;

/// TorchScript face mesh wrapper.
///
/// The module takes a `1x3x192x192` RGB tensor in `[0, 1]` and returns either
/// the landmark tensor alone or a `(landmarks, face_flag)` tuple. Landmarks
/// are `x, y, z` triples in input pixels; the face flag is a logit.
///
/// The whole frame is resized to the network input, so the exported module
/// must include its own face detection and crop stage (a detector followed by
/// the mesh head). A bare mesh head trained on face crops only works when the
/// face fills most of the frame.
pub struct FaceMeshExtractor {
    module: tch::CModule,
    device: Device,
    presence_threshold: f64,
}

impl FaceMeshExtractor {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(model_path: P, device: Device) -> Result<Self, ModelError> {
        let path = model_path.as_ref();
        let module =
            tch::CModule::load_on_device(path, device).map_err(|err| ModelError::Load {
                path: path.to_path_buf(),
                source: err.into(),
            })?;
        Ok(Self {
            module,
            device,
            presence_threshold: 0.5,
        })
    }

    /// Override the face-presence probability below which a frame counts as
    /// having no face.
    pub fn with_presence_threshold(mut self, threshold: f64) -> Self {
        self.presence_threshold = threshold;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn image_to_tensor(&self, image: &RgbImage) -> Tensor {
        let side = FACE_MESH_INPUT as u32;
        let resized = image::imageops::resize(image, side, side, FilterType::Triangle);
        Tensor::from_slice(resized.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, FACE_MESH_INPUT, FACE_MESH_INPUT, 3])
            .permute([0, 3, 1, 2])
            / 255.0
    }
}

impl LandmarkExtractor for FaceMeshExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Option<LandmarkSet>, ModelError> {
        let input = self.image_to_tensor(image);
        let output = tch::no_grad(|| self.module.forward_is(&[IValue::Tensor(input)]))
            .map_err(anyhow::Error::from)?;

        let (coords, presence) = match output {
            IValue::Tensor(coords) => (coords, None),
            IValue::TensorList(tensors) => {
                let mut tensors = tensors.into_iter();
                let coords = tensors.next().ok_or_else(|| {
                    ModelError::InvalidModel("face mesh returned an empty tensor list".into())
                })?;
                (coords, tensors.next())
            }
            IValue::Tuple(values) | IValue::GenericList(values) => {
                let mut tensors = values.into_iter().filter_map(|value| match value {
                    IValue::Tensor(tensor) => Some(tensor),
                    _ => None,
                });
                let coords = tensors.next().ok_or_else(|| {
                    ModelError::InvalidModel("face mesh returned no landmark tensor".into())
                })?;
                (coords, tensors.next())
            }
            other => {
                return Err(ModelError::InvalidModel(format!(
                    "unexpected face mesh output: {other:?}"
                )));
            }
        };

        if let Some(flag) = presence {
            let probability = flag
                .to_device(Device::Cpu)
                .to_kind(Kind::Double)
                .flatten(0, -1)
                .sigmoid()
                .double_value(&[0]);
            if probability < self.presence_threshold {
                return Ok(None);
            }
        }

        let values = Vec::<f32>::try_from(
            coords
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .flatten(0, -1),
        )
        .map_err(anyhow::Error::from)?;
        if values.len() % 3 != 0 {
            return Err(ModelError::InvalidModel(format!(
                "face mesh returned {} values, not a multiple of 3",
                values.len()
            )));
        }

        let scale = FACE_MESH_INPUT as f32;
        let points = values
            .chunks_exact(3)
            .map(|xyz| Point3::new(xyz[0] / scale, xyz[1] / scale, xyz[2] / scale))
            .collect();
        Ok(Some(LandmarkSet::new(points)))
    }
}
