//! Partial channel selection for PC-DARTS edges

use ndarray::Axis;
use rand::Rng;

use crate::error::{DartsError, Result};
use crate::nn::Tensor;

/// Picks which C / K channels of an edge input go through the mixed operation.
///
/// The selection is kept sorted. Before the first `sample` call it is the
/// leading C / K channels.
#[derive(Debug, Clone)]
pub struct ChannelSampler {
    channels: usize,
    proportion: usize,
    selected: Vec<usize>,
}

impl ChannelSampler {
    pub fn new(channels: usize, proportion: usize) -> Result<Self> {
        if proportion == 0 || channels == 0 || channels % proportion != 0 {
            return Err(DartsError::invalid_parameter(
                "partial_channels",
                proportion,
                format!("must be >= 1 and divide {} channels", channels),
            ));
        }
        Ok(Self {
            channels,
            proportion,
            selected: (0..channels / proportion).collect(),
        })
    }

    /// Number of channels routed through the mixed operation
    pub fn sampled_channels(&self) -> usize {
        self.channels / self.proportion
    }

    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Every channel goes through the mixed operation (plain DARTS)
    pub fn is_full(&self) -> bool {
        self.proportion == 1
    }

    /// Draw a fresh uniform subset of channels
    pub fn sample(&mut self, rng: &mut impl Rng) {
        if self.is_full() {
            return;
        }
        let mut picked = rand::seq::index::sample(rng, self.channels, self.sampled_channels()).into_vec();
        picked.sort_unstable();
        self.selected = picked;
    }

    /// Copy out the selected channels
    pub fn gather(&self, x: &Tensor) -> Result<Tensor> {
        self.check(x)?;
        Ok(x.select(Axis(1), &self.selected))
    }

    /// Write `part` back into the selected channels of `target`
    pub fn scatter(&self, target: &mut Tensor, part: &Tensor) -> Result<()> {
        self.check(target)?;
        let (n, _, h, w) = target.dim();
        if part.dim() != (n, self.selected.len(), h, w) {
            return Err(DartsError::shape((n, self.selected.len(), h, w), part.dim()));
        }
        for (j, &c) in self.selected.iter().enumerate() {
            target
                .index_axis_mut(Axis(1), c)
                .assign(&part.index_axis(Axis(1), j));
        }
        Ok(())
    }

    fn check(&self, x: &Tensor) -> Result<()> {
        if x.dim().1 != self.channels {
            return Err(DartsError::shape(
                format!("{} channels", self.channels),
                x.dim(),
            ));
        }
        Ok(())
    }
}
