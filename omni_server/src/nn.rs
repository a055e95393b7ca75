//! Object detection models.
//!
use std::path::Path;

use anyhow::{bail, Result};
use image::RgbImage;
use ndarray::{s, ArrayView2, Ix2};
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Bounding box as `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`,
/// normalized to the image size.
pub type Bbox = [f32; 4];

/// A detected object.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub confidence: f32,
    pub class_id: usize,
    pub label: String,
}

/// Detector turning a frame into a set of detections.
///
/// Implementations may take tens to hundreds of milliseconds per frame and are
/// only ever called from the capture thread.
pub trait InferModel: Send + Sync {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>>;
}

/// YOLOv8-style detector exported to ONNX.
///
/// Expects a `1x3xHxW` input scaled to `[0, 1]` and a `1x(4+C)xN` output with
/// center/size boxes in input pixels followed by `C` class scores.
pub struct YoloModel {
    model: NnModel,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl YoloModel {
    pub fn new(path: impl AsRef<Path>, min_confidence: f32, max_iou: f32) -> Result<Self> {
        let (width, height) = (640, 640);
        let model = get_yolo_model(path.as_ref(), width, height)?;
        log::info!("Loaded detection model {}", path.as_ref().display());

        Ok(Self {
            model,
            width,
            height,
            max_iou,
            min_confidence,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }
}

impl InferModel for YoloModel {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>> {
        let raw_nn_out = self.model.run(tvec!(self.preproc(input).into()))?;

        let output = raw_nn_out[0].to_array_view::<f32>()?;
        if output.ndim() != 3 {
            bail!("unexpected detector output shape {:?}", output.shape());
        }
        let predictions = output.slice(s![0, .., ..]).into_dimensionality::<Ix2>()?;

        Ok(decode_predictions(
            predictions,
            (self.width, self.height),
            self.min_confidence,
            self.max_iou,
        ))
    }
}

fn get_yolo_model(path: &Path, width: u32, height: u32) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, height as usize, width as usize),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Turn raw YOLO predictions into detections.
///
/// `predictions` is `(4 + C) x N`, or `N x (4 + C)` for exports with swapped
/// axes. Boxes are given in model input pixels of size `input_size`.
pub fn decode_predictions(
    predictions: ArrayView2<f32>,
    input_size: (u32, u32),
    min_confidence: f32,
    max_iou: f32,
) -> Vec<Detection> {
    // There are far more anchors than classes
    let predictions = if predictions.nrows() > predictions.ncols() {
        predictions.reversed_axes()
    } else {
        predictions
    };
    if predictions.nrows() <= 4 {
        return vec![];
    }

    let (width, height) = (input_size.0 as f32, input_size.1 as f32);

    let mut candidates: Vec<(f32, Bbox, usize)> = predictions
        .columns()
        .into_iter()
        .filter_map(|anchor| {
            let (class_id, confidence) = anchor
                .slice(s![4..])
                .iter()
                .cloned()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            if confidence <= min_confidence {
                return None;
            }

            let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
            let bbox = [
                ((cx - w / 2.0) / width).clamp(0.0, 1.0),
                ((cy - h / 2.0) / height).clamp(0.0, 1.0),
                ((cx + w / 2.0) / width).clamp(0.0, 1.0),
                ((cy + h / 2.0) / height).clamp(0.0, 1.0),
            ];
            Some((confidence, bbox, class_id))
        })
        .collect();

    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

    non_maximum_suppression(candidates, max_iou)
        .into_iter()
        .map(|(confidence, bbox, class_id)| Detection {
            bbox,
            confidence,
            class_id,
            label: class_label(class_id),
        })
        .collect()
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Candidates must be sorted by ascending confidence. Starting with the most
/// confident one, a candidate is kept only if it does not overlap by more than
/// `max_iou` with an already kept box of the same class.
fn non_maximum_suppression(
    mut sorted_candidates: Vec<(f32, Bbox, usize)>,
    max_iou: f32,
) -> Vec<(f32, Bbox, usize)> {
    let mut selected: Vec<(f32, Bbox, usize)> = vec![];
    'candidates: while let Some((confidence, bbox, class_id)) = sorted_candidates.pop() {
        for (_, selected_bbox, selected_class) in selected.iter() {
            if *selected_class == class_id && iou(&bbox, selected_bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push((confidence, bbox, class_id));
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // Without overlap, the corner points are ill defined and the area is zero
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// If the bottom-right point lies above or left of the top-left point, the area is zero.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// Name of a COCO class, `class <id>` for unknown ids.
pub fn class_label(class_id: usize) -> String {
    COCO_LABELS
        .get(class_id)
        .map(|label| label.to_string())
        .unwrap_or_else(|| format!("class {class_id}"))
}

pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];
