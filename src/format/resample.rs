//! Sample rate conversion.
//!
//! [`Resampler`] wraps a streaming, variable-ratio `rubato` kernel for
//! interleaved 16-bit PCM. Quality 0 is linear interpolation; higher
//! qualities use a windowed sinc filter whose length grows with quality.
//! Input is staged into fixed kernel chunks, so output trails input by up
//! to one chunk plus the filter delay.

use rubato::Resampler as _;
use rubato::{
    FastFixedIn, PolynomialDegree, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::buffer::BufferProvider;
use crate::format::convert::{i16_to_f32, read_i16, write_i16};
use crate::{AudioError, PcmParams, Quality};

/// Input frames allocated on top of the worst-case requirement.
pub const HEADROOM_FRAMES: usize = 10;

/// Input frames handed to the kernel per call.
const CHUNK_FRAMES: usize = 32;

/// How far the ratio may move before the kernel has to be rebuilt.
const MAX_RELATIVE_RATIO: f64 = 4.0;

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduces `in_rate : out_rate` to lowest terms.
fn reduce(in_rate: u32, out_rate: u32) -> (u32, u32) {
    match gcd(in_rate, out_rate) {
        0 => (in_rate, out_rate),
        g => (in_rate / g, out_rate / g),
    }
}

/// Rounds a kernel sample back to 16 bits.
fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Filter settings for sinc qualities 1..=10.
fn sinc_parameters(quality: u32) -> SincInterpolationParameters {
    let (interpolation, oversampling_factor) = match quality {
        0..=3 => (SincInterpolationType::Nearest, 64),
        4..=7 => (SincInterpolationType::Linear, 128),
        _ => (SincInterpolationType::Cubic, 256),
    };
    SincInterpolationParameters {
        sinc_len: 32 * quality as usize,
        f_cutoff: if quality < 6 { 0.91 } else { 0.95 },
        interpolation,
        oversampling_factor,
        window: if quality < 6 {
            WindowFunction::Blackman2
        } else {
            WindowFunction::BlackmanHarris2
        },
    }
}

enum Kernel {
    Linear(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

macro_rules! with_kernel {
    ($kernel:expr, $k:ident => $body:expr) => {
        match $kernel {
            Kernel::Linear($k) => $body,
            Kernel::Sinc($k) => $body,
        }
    };
}

impl Kernel {
    fn new(channels: usize, ratio: f64, quality: u32) -> Result<Self, AudioError> {
        let kernel = if quality == 0 {
            FastFixedIn::new(
                ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Linear,
                CHUNK_FRAMES,
                channels,
            )
            .map(Kernel::Linear)
        } else {
            SincFixedIn::new(
                ratio,
                MAX_RELATIVE_RATIO,
                sinc_parameters(quality),
                CHUNK_FRAMES,
                channels,
            )
            .map(Kernel::Sinc)
        };
        kernel.map_err(|e| AudioError::resampler_init(format!("failed to create kernel: {e}")))
    }

    fn output_frames_max(&self) -> usize {
        with_kernel!(self, k => k.output_frames_max())
    }
}

/// Streaming front of a rubato kernel.
///
/// `staged` collects planar input until a whole chunk is available;
/// `ready` holds interleaved output not handed out yet.
struct Converter {
    channels: usize,
    quality: u32,
    kernel: Kernel,
    staged: Vec<Vec<f32>>,
    wave_out: Vec<Vec<f32>>,
    ready: Vec<i16>,
    ready_pos: usize,
}

impl Converter {
    fn new(channels: usize, in_rate: u32, out_rate: u32, quality: u32) -> Result<Self, AudioError> {
        if channels == 0 {
            return Err(AudioError::resampler_init("zero channels"));
        }
        if in_rate == 0 || out_rate == 0 {
            return Err(AudioError::resampler_init(format!(
                "unsupported rates {in_rate} -> {out_rate}"
            )));
        }

        let quality = quality.min(Quality::MAX);
        let kernel = Kernel::new(channels, f64::from(out_rate) / f64::from(in_rate), quality)?;
        let wave_out = vec![vec![0.0; kernel.output_frames_max()]; channels];
        Ok(Self {
            channels,
            quality,
            kernel,
            staged: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
            wave_out,
            ready: Vec::new(),
            ready_pos: 0,
        })
    }

    /// Retunes the kernel, keeping its phase when the new ratio is within
    /// reach; otherwise a fresh kernel takes over.
    fn set_rates(&mut self, in_rate: u32, out_rate: u32) -> Result<(), AudioError> {
        let ratio = f64::from(out_rate) / f64::from(in_rate);
        if with_kernel!(&mut self.kernel, k => k.set_resample_ratio(ratio, false)).is_ok() {
            return Ok(());
        }
        tracing::debug!(in_rate, out_rate, "ratio out of kernel range, rebuilding");
        self.kernel = Kernel::new(self.channels, ratio, self.quality)?;
        let frames = self.kernel.output_frames_max();
        for lane in &mut self.wave_out {
            lane.resize(frames, 0.0);
        }
        Ok(())
    }

    /// Runs the kernel over one full chunk of staged input.
    fn run_kernel(&mut self) -> Result<(), AudioError> {
        let result = with_kernel!(&mut self.kernel, k => {
            k.process_into_buffer(&self.staged, &mut self.wave_out, None)
        });
        for lane in &mut self.staged {
            lane.clear();
        }
        let (_, produced) =
            result.map_err(|e| AudioError::resampler_init(format!("resampling failed: {e}")))?;

        self.ready.clear();
        self.ready_pos = 0;
        for frame in 0..produced {
            self.ready
                .extend(self.wave_out.iter().map(|lane| to_i16(lane[frame])));
        }
        Ok(())
    }

    /// Converts as much of `input` as needed to fill `output`.
    ///
    /// On return `in_frames` and `out_frames` hold the frames consumed and
    /// produced. Input is not taken once the output is full.
    fn process(
        &mut self,
        input: &[u8],
        in_frames: &mut usize,
        output: &mut [u8],
        out_frames: &mut usize,
    ) -> Result<(), AudioError> {
        let channels = self.channels;
        let available = (*in_frames).min(input.len() / (2 * channels));
        let capacity = (*out_frames).min(output.len() / (2 * channels));

        let mut consumed = 0;
        let mut produced = 0;
        loop {
            let pending = (self.ready.len() - self.ready_pos) / channels;
            let count = pending.min(capacity - produced);
            let from = self.ready_pos;
            for (i, &sample) in self.ready[from..from + count * channels].iter().enumerate() {
                write_i16(output, produced * channels + i, sample);
            }
            self.ready_pos += count * channels;
            produced += count;

            if produced == capacity || consumed == available {
                break;
            }

            let take = (CHUNK_FRAMES - self.staged[0].len()).min(available - consumed);
            for frame in consumed..consumed + take {
                for (ch, lane) in self.staged.iter_mut().enumerate() {
                    lane.push(i16_to_f32(read_i16(input, frame * channels + ch)));
                }
            }
            consumed += take;
            if self.staged[0].len() == CHUNK_FRAMES {
                if let Err(error) = self.run_kernel() {
                    *in_frames = consumed;
                    *out_frames = produced;
                    return Err(error);
                }
            }
        }

        *in_frames = consumed;
        *out_frames = produced;
        Ok(())
    }
}

/// Per-stream sample rate converter for 16-bit interleaved PCM.
///
/// Works in two modes:
/// - **pull** ([`resample_from`](Resampler::resample_from)): input frames
///   are pulled from a [`BufferProvider`] into a carry-over buffer until the
///   requested output is produced
/// - **push** ([`resample`](Resampler::resample)): caller supplies both
///   buffers and gets back the frames consumed and produced
///
/// Construction never fails; call [`init_check`](Resampler::init_check)
/// before use.
pub struct Resampler {
    in_params: PcmParams,
    out_params: PcmParams,
    quality: u32,
    ratio: (u32, u32),
    converter: Option<Converter>,
    carry: Vec<u8>,
    carry_frames: usize,
    avail: usize,
}

impl Resampler {
    /// Creates a resampler with identical input and output params.
    ///
    /// Rates are changed later with
    /// [`set_in_sample_rate`](Self::set_in_sample_rate) and
    /// [`set_out_sample_rate`](Self::set_out_sample_rate).
    pub fn new(params: PcmParams) -> Self {
        Self::with_quality(params, params, Quality::Default)
    }

    /// Creates a resampler between two param sets at the default quality.
    pub fn with_params(in_params: PcmParams, out_params: PcmParams) -> Self {
        Self::with_quality(in_params, out_params, Quality::Default)
    }

    /// Creates a resampler at the given quality, clamped to [`Quality::MAX`].
    pub fn with_quality(in_params: PcmParams, out_params: PcmParams, quality: impl Into<u32>) -> Self {
        let quality = quality.into().min(Quality::MAX);
        let ratio = reduce(in_params.sample_rate, out_params.sample_rate);

        let converter = match Converter::new(
            in_params.channels as usize,
            in_params.sample_rate,
            out_params.sample_rate,
            quality,
        ) {
            Ok(converter) => Some(converter),
            Err(error) => {
                tracing::error!(%error, "failed to create converter");
                None
            }
        };

        let mut resampler = Self {
            in_params,
            out_params,
            quality,
            ratio,
            converter,
            carry: Vec::new(),
            carry_frames: 0,
            avail: 0,
        };
        let frames = resampler.required_frames(out_params.frame_count) + HEADROOM_FRAMES;
        if let Err(error) = resampler.grow(frames) {
            tracing::error!(%error, "failed to allocate resampler buffer");
        }
        resampler
    }

    /// Checks that the resampler can be used.
    ///
    /// Fails if either side is not 16-bit, if channel counts differ, or if
    /// the converter or its buffer could not be created.
    pub fn init_check(&self) -> Result<(), AudioError> {
        if self.in_params.sample_bits != 16 || self.out_params.sample_bits != 16 {
            return Err(AudioError::incompatible(format!(
                "resampler supports 16-bit samples only ({} -> {} bits)",
                self.in_params.sample_bits, self.out_params.sample_bits
            )));
        }
        if self.in_params.channels != self.out_params.channels {
            return Err(AudioError::incompatible(format!(
                "resampler cannot change channel count ({} -> {})",
                self.in_params.channels, self.out_params.channels
            )));
        }
        if self.converter.is_none() {
            return Err(AudioError::resampler_init("converter was not created"));
        }
        if self.carry_frames == 0 {
            return Err(AudioError::Allocation {
                bytes: self.in_params.frame_size(),
            });
        }
        Ok(())
    }

    /// Input params.
    #[must_use]
    pub fn in_params(&self) -> PcmParams {
        self.in_params
    }

    /// Output params.
    #[must_use]
    pub fn out_params(&self) -> PcmParams {
        self.out_params
    }

    /// Quality in use.
    #[must_use]
    pub fn quality(&self) -> u32 {
        self.quality
    }

    /// Current `in_rate : out_rate` ratio in lowest terms.
    #[must_use]
    pub fn ratio(&self) -> (u32, u32) {
        self.ratio
    }

    /// Capacity of the carry-over buffer, in input frames.
    #[must_use]
    pub fn buffer_frames(&self) -> usize {
        self.carry_frames
    }

    /// Returns `true` if the output rate is higher than the input rate.
    #[must_use]
    pub fn is_upsampler(&self) -> bool {
        self.ratio.0 < self.ratio.1
    }

    /// Returns `true` if the output rate is lower than the input rate.
    #[must_use]
    pub fn is_downsampler(&self) -> bool {
        self.ratio.0 > self.ratio.1
    }

    /// Changes the input rate. Setting the current rate does nothing.
    pub fn set_in_sample_rate(&mut self, rate: u32) -> Result<(), AudioError> {
        if rate == self.in_params.sample_rate {
            return Ok(());
        }
        if rate == 0 {
            return Err(AudioError::invalid_params("input rate is zero"));
        }
        self.in_params.sample_rate = rate;
        self.update_ratio()
    }

    /// Changes the output rate. Setting the current rate does nothing.
    pub fn set_out_sample_rate(&mut self, rate: u32) -> Result<(), AudioError> {
        if rate == self.out_params.sample_rate {
            return Ok(());
        }
        if rate == 0 {
            return Err(AudioError::invalid_params("output rate is zero"));
        }
        self.out_params.sample_rate = rate;
        self.update_ratio()
    }

    fn update_ratio(&mut self) -> Result<(), AudioError> {
        self.ratio = reduce(self.in_params.sample_rate, self.out_params.sample_rate);
        if let Some(converter) = self.converter.as_mut() {
            converter.set_rates(self.in_params.sample_rate, self.out_params.sample_rate)?;
        }
        tracing::debug!(
            in_rate = self.in_params.sample_rate,
            out_rate = self.out_params.sample_rate,
            num = self.ratio.0,
            den = self.ratio.1,
            "resampler ratio updated"
        );
        let frames = self.required_frames(self.out_params.frame_count) + HEADROOM_FRAMES;
        if frames > self.carry_frames {
            self.grow(frames)?;
        }
        Ok(())
    }

    /// Worst-case input frames needed for `out_frames` output frames.
    fn required_frames(&self, out_frames: usize) -> usize {
        let (num, den) = (self.ratio.0.max(1) as usize, self.ratio.1.max(1) as usize);
        out_frames * num / den + 1
    }

    fn grow(&mut self, frames: usize) -> Result<(), AudioError> {
        let bytes = frames * self.in_params.frame_size();
        if bytes > self.carry.len() {
            self.carry
                .try_reserve_exact(bytes - self.carry.len())
                .map_err(|_| AudioError::Allocation { bytes })?;
            self.carry.resize(bytes, 0);
        }
        self.carry_frames = frames;
        Ok(())
    }

    /// Pull mode: fills `out` with `out_frames` frames converted from
    /// frames pulled out of `provider`.
    ///
    /// Returns the number of frames produced. Fewer than `out_frames` are
    /// produced only when the provider runs dry; if nothing at all could be
    /// produced the provider's error (or [`AudioError::Underrun`]) is
    /// returned. Unconsumed input is kept for the next call.
    pub fn resample_from(
        &mut self,
        provider: &dyn BufferProvider,
        out: &mut [u8],
        out_frames: usize,
    ) -> Result<usize, AudioError> {
        if self.converter.is_none() {
            return Err(AudioError::resampler_init("converter was not created"));
        }
        let in_size = self.in_params.frame_size();
        let out_size = self.out_params.frame_size();
        let out_frames = out_frames.min(out.len() / out_size.max(1));

        let need = self.required_frames(out_frames);
        if need > self.carry_frames {
            self.grow(need + HEADROOM_FRAMES)?;
        }

        let mut written = 0;
        let mut last_error = None;
        while written < out_frames {
            let mut fetched = 0;
            if self.avail < need {
                match provider.get_next_buffer(need - self.avail) {
                    Ok(mut buffer) => {
                        if buffer.frame_size() != in_size {
                            let error = AudioError::invalid_params(format!(
                                "provider buffer has {}-byte frames, expected {in_size}",
                                buffer.frame_size()
                            ));
                            buffer.set_frames(0);
                            buffer.set_error(error.clone());
                            provider.release_buffer(buffer);
                            return Err(error);
                        }
                        fetched = buffer.frames().min(self.carry_frames - self.avail);
                        let start = self.avail * in_size;
                        let end = start + fetched * in_size;
                        self.carry[start..end].copy_from_slice(&buffer.as_bytes()[..fetched * in_size]);
                        buffer.set_frames(fetched);
                        provider.release_buffer(buffer);
                        self.avail += fetched;
                    }
                    Err(error) => {
                        tracing::trace!(%error, "resampler input provider has no frames");
                        last_error = Some(error);
                    }
                }
            }

            let Some(converter) = self.converter.as_mut() else {
                break;
            };
            let mut in_frames = self.avail;
            let mut produced = out_frames - written;
            converter.process(
                &self.carry[..self.avail * in_size],
                &mut in_frames,
                &mut out[written * out_size..out_frames * out_size],
                &mut produced,
            )?;
            written += produced;
            self.carry
                .copy_within(in_frames * in_size..self.avail * in_size, 0);
            self.avail -= in_frames;

            if produced == 0 && fetched == 0 {
                break;
            }
        }

        if written == 0 && out_frames > 0 {
            return Err(last_error.unwrap_or(AudioError::Underrun));
        }
        Ok(written)
    }

    /// Push mode: converts `input` into `output`.
    ///
    /// `in_frames` and `out_frames` carry the available input and output
    /// capacity in, and the frames consumed and produced out.
    pub fn resample(
        &mut self,
        input: &[u8],
        in_frames: &mut usize,
        output: &mut [u8],
        out_frames: &mut usize,
    ) -> Result<(), AudioError> {
        let converter = self
            .converter
            .as_mut()
            .ok_or_else(|| AudioError::resampler_init("converter was not created"))?;
        converter.process(input, in_frames, output, out_frames)
    }
}

impl std::fmt::Debug for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("in_params", &self.in_params)
            .field("out_params", &self.out_params)
            .field("quality", &self.quality)
            .field("ratio", &self.ratio)
            .field("buffer_frames", &self.carry_frames)
            .finish_non_exhaustive()
    }
}
