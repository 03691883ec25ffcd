//! Recurrent encoder and decoder with gated add-and-norm.
//!
//! The encoder runs a stacked LSTM over the past steps from a zero state and
//! hands its final hidden and cell states to the decoder, which continues
//! over the future steps.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::{param_name, sigmoid, LayerNorm, Linear, Module};
use crate::tft::gating::Glu;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rand::Rng;

/// Single LSTM cell with gates in the order input, forget, cell, output.
#[derive(Clone, Debug)]
pub struct LstmCell {
    // Input projection to the four stacked gates
    w_ih: Linear,
    // Hidden projection to the four stacked gates
    w_hh: Linear,
}

impl LstmCell {
    /// Create a cell mapping `input_dim` to `hidden_dim`.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self {
            w_ih: Linear::new(input_dim, 4 * hidden_dim, true, rng),
            w_hh: Linear::new(hidden_dim, 4 * hidden_dim, true, rng),
        }
    }

    /// Create from explicit projections with `4 * hidden` outputs each.
    pub fn from_parts(w_ih: Linear, w_hh: Linear) -> Result<Self> {
        let gates = w_hh.in_dim() * 4;
        if w_ih.out_dim() != gates || w_hh.out_dim() != gates {
            return Err(Error::shape(
                "lstm gate projections",
                &[gates, gates],
                &[w_ih.out_dim(), w_hh.out_dim()],
            ));
        }
        Ok(Self { w_ih, w_hh })
    }

    /// Hidden width.
    pub fn hidden_dim(&self) -> usize {
        self.w_hh.in_dim()
    }

    /// One step on `(batch, input)` with state `(batch, hidden)`.
    ///
    /// Returns the next `(h, c)`.
    pub fn step(
        &self,
        x: ArrayView2<'_, f32>,
        h: ArrayView2<'_, f32>,
        c: ArrayView2<'_, f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let d = self.hidden_dim();
        if c.dim() != h.dim() {
            return Err(Error::shape("lstm cell state", h.shape(), c.shape()));
        }
        let gates = self.w_ih.forward2(x)? + &self.w_hh.forward2(h)?;
        if gates.nrows() != c.nrows() {
            return Err(Error::shape("lstm state batch", &[gates.nrows(), d], c.shape()));
        }

        let input = gates.slice(s![.., 0..d]).mapv(sigmoid);
        let forget = gates.slice(s![.., d..2 * d]).mapv(sigmoid);
        let candidate = gates.slice(s![.., 2 * d..3 * d]).mapv(f32::tanh);
        let output = gates.slice(s![.., 3 * d..]).mapv(sigmoid);

        let c_next = &forget * &c + &input * &candidate;
        let h_next = output * &c_next.mapv(f32::tanh);
        Ok((h_next, c_next))
    }
}

impl Module for LstmCell {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.w_ih.collect_parameters(&param_name(prefix, "w_ih"), state);
        self.w_hh.collect_parameters(&param_name(prefix, "w_hh"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.w_ih.load_parameters(&param_name(prefix, "w_ih"), state)?;
        self.w_hh.load_parameters(&param_name(prefix, "w_hh"), state)
    }
}

/// Final hidden and cell states, each `(layers, batch, d_model)`.
#[derive(Clone, Debug, PartialEq)]
pub struct LstmState {
    pub hidden: Array3<f32>,
    pub cell: Array3<f32>,
}

impl LstmState {
    /// All-zero state.
    pub fn zeros(layers: usize, batch: usize, d_model: usize) -> Self {
        Self {
            hidden: Array3::zeros((layers, batch, d_model)),
            cell: Array3::zeros((layers, batch, d_model)),
        }
    }
}

/// Stacked LSTM over `(batch, time, d_model)`, batch first.
#[derive(Clone, Debug)]
pub struct Lstm {
    d_model: usize,
    layers: Vec<LstmCell>,
}

impl Lstm {
    /// Create `n_layers` cells of width `d_model`.
    pub fn new<R: Rng + ?Sized>(n_layers: usize, d_model: usize, rng: &mut R) -> Result<Self> {
        if n_layers == 0 || d_model == 0 {
            return Err(Error::InvalidConfig(format!(
                "lstm needs at least one layer and a positive width, got {} layers of {}",
                n_layers, d_model
            )));
        }
        let layers = (0..n_layers)
            .map(|_| LstmCell::new(d_model, d_model, rng))
            .collect();
        Ok(Self { d_model, layers })
    }

    /// Number of stacked layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Run from `initial`, returning the top layer outputs and the final state.
    pub fn forward(&self, x: &Array3<f32>, initial: &LstmState) -> Result<(Array3<f32>, LstmState)> {
        let (batch, time, d) = x.dim();
        if d != self.d_model {
            return Err(Error::shape("lstm input", &[batch, time, self.d_model], x.shape()));
        }
        let state_dim = (self.layers.len(), batch, self.d_model);
        if initial.hidden.dim() != state_dim || initial.cell.dim() != state_dim {
            let bad = if initial.hidden.dim() != state_dim {
                &initial.hidden
            } else {
                &initial.cell
            };
            return Err(Error::shape(
                "lstm state",
                &[state_dim.0, state_dim.1, state_dim.2],
                bad.shape(),
            ));
        }

        let mut last = initial.clone();
        let mut seq = x.clone();
        for (k, cell) in self.layers.iter().enumerate() {
            let mut h = initial.hidden.index_axis(Axis(0), k).to_owned();
            let mut c = initial.cell.index_axis(Axis(0), k).to_owned();
            let mut out = Array3::zeros((batch, time, self.d_model));
            for t in 0..time {
                let (h_next, c_next) = cell.step(seq.slice(s![.., t, ..]), h.view(), c.view())?;
                out.slice_mut(s![.., t, ..]).assign(&h_next);
                h = h_next;
                c = c_next;
            }
            last.hidden.index_axis_mut(Axis(0), k).assign(&h);
            last.cell.index_axis_mut(Axis(0), k).assign(&c);
            seq = out;
        }
        Ok((seq, last))
    }
}

impl Module for Lstm {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        for (k, cell) in self.layers.iter().enumerate() {
            cell.collect_parameters(&param_name(prefix, &k.to_string()), state);
        }
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        for (k, cell) in self.layers.iter_mut().enumerate() {
            cell.load_parameters(&param_name(prefix, &k.to_string()), state)?;
        }
        Ok(())
    }
}

/// Shared body of the encoder and decoder: `norm(glu(lstm(x)) + x)`.
#[derive(Clone, Debug)]
struct GatedLstm {
    lstm: Lstm,
    glu: Glu,
    norm: LayerNorm,
}

impl GatedLstm {
    fn new<R: Rng + ?Sized>(n_layers: usize, d_model: usize, rng: &mut R) -> Result<Self> {
        Ok(Self {
            lstm: Lstm::new(n_layers, d_model, rng)?,
            glu: Glu::new(d_model, rng),
            norm: LayerNorm::new(d_model),
        })
    }

    fn forward(&self, x: &Array3<f32>, initial: &LstmState) -> Result<(Array3<f32>, LstmState)> {
        let (out, last) = self.lstm.forward(x, initial)?;
        let gated = self.glu.forward(&out)?;
        Ok((self.norm.forward(&(gated + x))?, last))
    }
}

impl Module for GatedLstm {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.lstm.collect_parameters(&param_name(prefix, "lstm"), state);
        self.glu.collect_parameters(&param_name(prefix, "glu"), state);
        self.norm.collect_parameters(&param_name(prefix, "norm"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.lstm.load_parameters(&param_name(prefix, "lstm"), state)?;
        self.glu.load_parameters(&param_name(prefix, "glu"), state)?;
        self.norm.load_parameters(&param_name(prefix, "norm"), state)
    }
}

/// LSTM encoder over the past steps, starting from a zero state.
#[derive(Clone, Debug)]
pub struct EncoderLstm {
    inner: GatedLstm,
}

impl EncoderLstm {
    /// Create with `n_layers` stacked cells of width `d_model`.
    pub fn new<R: Rng + ?Sized>(n_layers: usize, d_model: usize, rng: &mut R) -> Result<Self> {
        Ok(Self {
            inner: GatedLstm::new(n_layers, d_model, rng)?,
        })
    }

    /// Encode `(batch, past, d_model)`, returning the gated output and the
    /// state for [`DecoderLstm::forward`].
    pub fn forward(&self, x: &Array3<f32>) -> Result<(Array3<f32>, LstmState)> {
        let lstm = &self.inner.lstm;
        let zeros = LstmState::zeros(lstm.num_layers(), x.dim().0, lstm.d_model);
        self.inner.forward(x, &zeros)
    }
}

impl Module for EncoderLstm {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.inner.collect_parameters(prefix, state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.inner.load_parameters(prefix, state)
    }
}

/// LSTM decoder over the future steps, continuing from the encoder state.
#[derive(Clone, Debug)]
pub struct DecoderLstm {
    inner: GatedLstm,
}

impl DecoderLstm {
    /// Create with `n_layers` stacked cells of width `d_model`.
    pub fn new<R: Rng + ?Sized>(n_layers: usize, d_model: usize, rng: &mut R) -> Result<Self> {
        Ok(Self {
            inner: GatedLstm::new(n_layers, d_model, rng)?,
        })
    }

    /// Decode `(batch, future, d_model)` from `state`.
    pub fn forward(&self, x: &Array3<f32>, state: &LstmState) -> Result<Array3<f32>> {
        self.inner.forward(x, state).map(|(out, _)| out)
    }
}

impl Module for DecoderLstm {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.inner.collect_parameters(prefix, state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.inner.load_parameters(prefix, state)
    }
}
