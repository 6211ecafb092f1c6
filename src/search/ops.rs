//! Candidate operations for cell edges

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DartsError, Result};
use crate::nn::{
    AvgPool2d, Conv2d, Identity, Layer, MaxPool2d, ParamView, ParamViewMut, Parameterized,
    Tensor, Zero,
};

/// Types of operations an edge can choose between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// No connection
    #[serde(rename = "zero")]
    Zero,
    /// Skip connection
    #[serde(rename = "identity")]
    Identity,
    /// 3x3 convolution
    #[serde(rename = "conv_3x3")]
    Conv3x3,
    /// 1x1 convolution
    #[serde(rename = "conv_1x1")]
    Conv1x1,
    /// 3x3 max pooling, stride 1
    #[serde(rename = "max_pool_3x3")]
    MaxPool3x3,
    /// 3x3 average pooling, stride 1
    #[serde(rename = "avg_pool_3x3")]
    AvgPool3x3,
}

impl OperationKind {
    /// Every supported operation
    pub const ALL: [OperationKind; 6] = [
        Self::Zero,
        Self::Identity,
        Self::Conv3x3,
        Self::Conv1x1,
        Self::MaxPool3x3,
        Self::AvgPool3x3,
    ];

    /// The five-way candidate set searched by default
    pub fn default_candidates() -> Vec<Self> {
        vec![
            Self::Identity,
            Self::Conv3x3,
            Self::Conv1x1,
            Self::MaxPool3x3,
            Self::AvgPool3x3,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::Identity => "identity",
            Self::Conv3x3 => "conv_3x3",
            Self::Conv1x1 => "conv_1x1",
            Self::MaxPool3x3 => "max_pool_3x3",
            Self::AvgPool3x3 => "avg_pool_3x3",
        }
    }

    pub fn has_parameters(&self) -> bool {
        matches!(self, Self::Conv3x3 | Self::Conv1x1)
    }

    /// Instantiate the operation for `channels` input and output channels
    pub fn build(&self, channels: usize, rng: &mut impl Rng) -> Result<CandidateOp> {
        Ok(match self {
            Self::Zero => CandidateOp::Zero(Zero),
            Self::Identity => CandidateOp::Identity(Identity),
            Self::Conv3x3 => CandidateOp::Conv(Conv2d::new(channels, channels, 3, rng)?),
            Self::Conv1x1 => CandidateOp::Conv(Conv2d::new(channels, channels, 1, rng)?),
            Self::MaxPool3x3 => CandidateOp::MaxPool(MaxPool2d::new(3)),
            Self::AvgPool3x3 => CandidateOp::AvgPool(AvgPool2d::new(3)),
        })
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = DartsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|op| op.name() == s)
            .copied()
            .ok_or_else(|| {
                DartsError::invalid_parameter("operation", s, "unknown operation name")
            })
    }
}

/// A concrete operation living on one edge
#[derive(Debug, Clone)]
pub enum CandidateOp {
    Zero(Zero),
    Identity(Identity),
    Conv(Conv2d),
    MaxPool(MaxPool2d),
    AvgPool(AvgPool2d),
}

impl CandidateOp {
    fn layer(&self) -> &dyn Layer {
        match self {
            Self::Zero(l) => l,
            Self::Identity(l) => l,
            Self::Conv(l) => l,
            Self::MaxPool(l) => l,
            Self::AvgPool(l) => l,
        }
    }

    fn layer_mut(&mut self) -> &mut dyn Layer {
        match self {
            Self::Zero(l) => l,
            Self::Identity(l) => l,
            Self::Conv(l) => l,
            Self::MaxPool(l) => l,
            Self::AvgPool(l) => l,
        }
    }
}

impl Parameterized for CandidateOp {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        self.layer().parameters()
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        self.layer_mut().parameters_mut()
    }
}

impl Layer for CandidateOp {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.layer_mut().forward(x)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        self.layer_mut().backward(grad)
    }
}
