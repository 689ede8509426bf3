//! Export of retrieved samples as a polars `DataFrame`.

use polars::prelude::*;

use crate::buffers::BufferBinder;
use crate::channel::{ChannelId, ChannelSettings};
use crate::resolution::AdcLimits;

pub const TIME_COLUMN_NAME: &str = "time";

pub fn raw_column_name(channel: ChannelId) -> String {
    format!("{channel}_raw")
}

pub fn volts_column_name(channel: ChannelId) -> String {
    format!("{channel}_volts")
}

/// Everything needed to put one segment on a physical axis.
#[derive(Debug, Clone, Copy)]
pub struct FrameScale<'a> {
    pub interval: f64,
    pub num_samples: u64,
    pub limits: AdcLimits,
    pub channels: &'a [(ChannelId, ChannelSettings)],
}

/// One row per sample of `segment`: a `time` column in seconds, then a raw and
/// a volts column for each channel bound in `binder`.
pub fn capture_to_dataframe(
    binder: &BufferBinder<'_>,
    segment: u32,
    scale: &FrameScale<'_>,
) -> PolarsResult<DataFrame> {
    #[cfg(feature = "cpu-profiling")]
    let _span = tracy_client::Client::running()
        .map(|client| client.span(tracy_client::span_location!("capture_to_dataframe"), 0));

    let mut columns: Vec<Column> = Vec::new();
    let mut volts = Vec::new();
    let mut selection = vec![col(TIME_COLUMN_NAME)];
    for (channel, settings) in scale.channels {
        let Some(samples) = binder.get(*channel, segment) else {
            continue;
        };
        let len = (scale.num_samples as usize).min(samples.len());
        let raw: Vec<i32> = samples[..len].iter().map(|&code| i32::from(code)).collect();
        let raw_name = raw_column_name(*channel);
        let volts_name = volts_column_name(*channel);
        columns.push(Series::new(raw_name.as_str().into(), raw).into());

        let volts_per_code = settings.range.volts() / f64::from(scale.limits.max);
        volts.push(
            (col(raw_name.as_str()).cast(DataType::Float64) * lit(volts_per_code)
                - lit(settings.analog_offset))
            .alias(volts_name.as_str()),
        );
        selection.push(col(raw_name.as_str()));
        selection.push(col(volts_name.as_str()));
    }

    if columns.is_empty() {
        return Err(PolarsError::NoData(
            format!("no buffers bound for segment {segment}").into(),
        ));
    }

    DataFrame::new(columns)?
        .lazy()
        .with_row_index("row_index", Some(0))
        .with_columns(volts)
        .with_column(
            (col("row_index").cast(DataType::Float64) * lit(scale.interval)).alias(TIME_COLUMN_NAME),
        )
        .select(selection)
        .collect()
}
