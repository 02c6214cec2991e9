//! Typed message envelopes.
//!
//! A request file on disk is one u32 operation tag followed by one request
//! message. Responses and status snapshots are a bare message each.

use crate::{header_for, read_f32, read_f32_vec, read_string, read_u32};
use crate::{write_f32, write_f32_vec, write_string, write_u32, ProtoError};
use std::io::{Read, Write};

/// Operation tag leading a request file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpKind {
    /// Point-splat convolution.
    ConvNaive = 0,
    /// Chromatic dispersion.
    Dispersion = 1,
}

impl OpKind {
    /// Writes the tag as the leading u32 of a request stream.
    pub fn write_tag<W: Write>(self, w: &mut W) -> Result<(), ProtoError> {
        write_u32(w, self as u32)
    }

    /// Reads and validates the leading operation tag.
    pub fn read_tag<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        match read_u32(r)? {
            0 => Ok(Self::ConvNaive),
            1 => Ok(Self::Dispersion),
            other => Err(ProtoError::UnknownOp(other)),
        }
    }
}

/// A self-describing binary message.
///
/// `read_from` verifies the header before touching the body; `write_to`
/// emits the header first. Implementations only describe their body
/// fields.
pub trait BinaryMessage: Sized {
    /// Message kind, embedded verbatim in the header.
    const KIND: &'static str;

    /// Decodes the body fields, in declaration order.
    fn read_body<R: Read>(r: &mut R) -> Result<Self, ProtoError>;

    /// Encodes the body fields, in declaration order.
    fn write_body<W: Write>(&self, w: &mut W) -> Result<(), ProtoError>;

    /// Reads a full envelope, rejecting any header mismatch.
    fn read_from<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        let expected = header_for(Self::KIND);
        let found = read_string(r)?;
        if found != expected {
            return Err(ProtoError::HeaderMismatch { expected, found });
        }
        Self::read_body(r)
    }

    /// Writes a full envelope.
    fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        write_string(w, &header_for(Self::KIND))?;
        self.write_body(w)
    }
}

/// Request body for a point-splat convolution run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConvNaiveRequest {
    /// Name of the status-file lock, embedded so both sides agree.
    pub stat_lock_name: String,
    /// Number of progress chunks to split the workload into.
    pub num_chunks: u32,
    /// Sleep between chunks, in milliseconds.
    pub chunk_sleep_ms: u32,
    /// Normalized kernel center X.
    pub kernel_center_x: f32,
    /// Normalized kernel center Y.
    pub kernel_center_y: f32,
    /// Luminance threshold below which pixels contribute nothing.
    pub threshold: f32,
    /// Knee parameter for the soft threshold ramp.
    pub knee: f32,
    /// Global convolution normalization multiplier.
    pub conv_multiplier: f32,
    /// Input raster width.
    pub input_width: u32,
    /// Input raster height.
    pub input_height: u32,
    /// Kernel raster width.
    pub kernel_width: u32,
    /// Kernel raster height.
    pub kernel_height: u32,
    /// Flat RGBA input buffer.
    pub input_buffer: Vec<f32>,
    /// Flat RGBA kernel buffer.
    pub kernel_buffer: Vec<f32>,
}

impl BinaryMessage for ConvNaiveRequest {
    const KIND: &'static str = "ConvNaiveRequest";

    fn read_body<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        Ok(Self {
            stat_lock_name: read_string(r)?,
            num_chunks: read_u32(r)?,
            chunk_sleep_ms: read_u32(r)?,
            kernel_center_x: read_f32(r)?,
            kernel_center_y: read_f32(r)?,
            threshold: read_f32(r)?,
            knee: read_f32(r)?,
            conv_multiplier: read_f32(r)?,
            input_width: read_u32(r)?,
            input_height: read_u32(r)?,
            kernel_width: read_u32(r)?,
            kernel_height: read_u32(r)?,
            input_buffer: read_f32_vec(r)?,
            kernel_buffer: read_f32_vec(r)?,
        })
    }

    fn write_body<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        write_string(w, &self.stat_lock_name)?;
        write_u32(w, self.num_chunks)?;
        write_u32(w, self.chunk_sleep_ms)?;
        write_f32(w, self.kernel_center_x)?;
        write_f32(w, self.kernel_center_y)?;
        write_f32(w, self.threshold)?;
        write_f32(w, self.knee)?;
        write_f32(w, self.conv_multiplier)?;
        write_u32(w, self.input_width)?;
        write_u32(w, self.input_height)?;
        write_u32(w, self.kernel_width)?;
        write_u32(w, self.kernel_height)?;
        write_f32_vec(w, &self.input_buffer)?;
        write_f32_vec(w, &self.kernel_buffer)
    }
}

/// Response body for a convolution run. `status == 1` means success.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConvNaiveResponse {
    /// 1 on success, 0 on failure.
    pub status: u32,
    /// Error description when `status != 1`.
    pub error: String,
    /// Flat RGBA output buffer, input-sized.
    pub buffer: Vec<f32>,
}

impl BinaryMessage for ConvNaiveResponse {
    const KIND: &'static str = "ConvNaiveResponse";

    fn read_body<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        Ok(Self {
            status: read_u32(r)?,
            error: read_string(r)?,
            buffer: read_f32_vec(r)?,
        })
    }

    fn write_body<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        write_u32(w, self.status)?;
        write_string(w, &self.error)?;
        write_f32_vec(w, &self.buffer)
    }
}

/// Periodic status snapshot streamed by the worker between chunks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConvNaiveStat {
    /// Chunks finished so far.
    pub chunks_done: u32,
    /// Accumulated output so far, input-sized.
    pub buffer: Vec<f32>,
}

impl BinaryMessage for ConvNaiveStat {
    const KIND: &'static str = "ConvNaiveStat";

    fn read_body<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        Ok(Self {
            chunks_done: read_u32(r)?,
            buffer: read_f32_vec(r)?,
        })
    }

    fn write_body<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        write_u32(w, self.chunks_done)?;
        write_f32_vec(w, &self.buffer)
    }
}

/// Request body for a dispersion run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispersionRequest {
    /// Dispersion amount in `[0, 1]`.
    pub amount: f32,
    /// Number of wavelength steps.
    pub steps: u32,
    /// Input raster width.
    pub input_width: u32,
    /// Input raster height.
    pub input_height: u32,
    /// Flat RGBA input buffer.
    pub input_buffer: Vec<f32>,
    /// Flat RGB wavelength samples, `steps * 3` floats.
    pub cmf_samples: Vec<f32>,
}

impl BinaryMessage for DispersionRequest {
    const KIND: &'static str = "DispersionRequest";

    fn read_body<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        Ok(Self {
            amount: read_f32(r)?,
            steps: read_u32(r)?,
            input_width: read_u32(r)?,
            input_height: read_u32(r)?,
            input_buffer: read_f32_vec(r)?,
            cmf_samples: read_f32_vec(r)?,
        })
    }

    fn write_body<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        write_f32(w, self.amount)?;
        write_u32(w, self.steps)?;
        write_u32(w, self.input_width)?;
        write_u32(w, self.input_height)?;
        write_f32_vec(w, &self.input_buffer)?;
        write_f32_vec(w, &self.cmf_samples)
    }
}

/// Response body for a dispersion run. `status == 1` means success.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispersionResponse {
    /// 1 on success, 0 on failure.
    pub status: u32,
    /// Error description when `status != 1`.
    pub error: String,
    /// Flat RGBA output buffer, input-sized.
    pub buffer: Vec<f32>,
}

impl BinaryMessage for DispersionResponse {
    const KIND: &'static str = "DispersionResponse";

    fn read_body<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        Ok(Self {
            status: read_u32(r)?,
            error: read_string(r)?,
            buffer: read_f32_vec(r)?,
        })
    }

    fn write_body<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        write_u32(w, self.status)?;
        write_string(w, &self.error)?;
        write_f32_vec(w, &self.buffer)
    }
}
