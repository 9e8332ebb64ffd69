#![allow(dead_code)]

use std::sync::Arc;

use tensor_stream::{
    Converter, ConverterOptions, DecoderBackend, PixelFormat, ReadParams, StreamPool,
    SyntheticBackend,
};

pub fn pooled_converter(
    source: &str,
    device_id: u32,
    backend: &SyntheticBackend,
    pool: &StreamPool,
) -> Converter {
    let mut converter = Converter::new(source, options(device_id), shared(backend));
    converter.add_stream_pool(pool).unwrap();
    converter
}

pub fn direct_converter(source: &str, backend: &SyntheticBackend) -> Converter {
    Converter::new(source, options(0), shared(backend))
}

pub fn options(device_id: u32) -> ConverterOptions {
    ConverterOptions {
        device_id,
        thread_pool_size: 2,
        ..ConverterOptions::default()
    }
}

pub fn shared(backend: &SyntheticBackend) -> Arc<dyn DecoderBackend> {
    Arc::new(backend.clone())
}

pub fn y800() -> ReadParams {
    ReadParams {
        pixel_format: PixelFormat::Y800,
        ..ReadParams::default()
    }
}
