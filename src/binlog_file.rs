use std::path::Path;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::info;

use crate::config::Config;
use crate::dispatch::{Dispatcher, Flow};
use crate::errors::{BinlogParseError, EventParseError, PipelineError};
use crate::event::{
    ChecksumAlgorithm, EventData, EventHeader, TypeCode, EVENT_HEADER_SIZE,
};
use crate::position::{basename_and_index, next_binlog_name, BinlogPosition};

/// The 4-byte magic every binlog file starts with: 0xFE 'b' 'i' 'n'.
const BINLOG_MAGIC: [u8; 4] = [0xfe, 0x62, 0x69, 0x6e];

enum FileOutcome {
    /// A stop condition fired mid-file.
    Stop,
    /// Clean EOF; the caller may try the next file in the sequence.
    End,
}

/// Read binlog files from disk, starting at the configured file and walking
/// the numeric suffix sequence until a file is missing or a stop condition
/// fires. Rotation events only rename the stream; the next file is opened
/// by suffix arithmetic when the current one ends.
pub async fn run(cfg: Arc<Config>, mut dispatcher: Dispatcher) -> Result<(), PipelineError> {
    info!("start to parse binlog from local files");
    let start = cfg
        .start_position
        .clone()
        .ok_or_else(|| PipelineError::Config("start position not derived".to_owned()))?;
    let (base, mut index) = basename_and_index(&start.name).ok_or_else(|| {
        PipelineError::Config(format!(
            "binlog name {:?} has no numeric suffix to advance",
            start.name
        ))
    })?;

    let mut current = start.name;
    loop {
        if let Some(stop) = &cfg.stop_position {
            if *stop <= BinlogPosition::new(current.clone(), 4) {
                info!(file = %current, "stop position precedes this file, ending");
                break;
            }
        }
        let path = cfg.binlog_dir.join(&current);
        info!(file = %path.display(), "start to parse binlog file");
        dispatcher.set_current_binlog(&current);
        match parse_one_file(&mut dispatcher, &path).await? {
            FileOutcome::Stop => break,
            FileOutcome::End => {
                let next = next_binlog_name(&base, index);
                index += 1;
                let next_path = cfg.binlog_dir.join(&next);
                let is_file = tokio::fs::metadata(&next_path)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if !is_file {
                    info!(file = %next_path.display(), "next binlog does not exist, ending");
                    break;
                }
                current = next;
            }
        }
    }
    info!("finish parsing binlog from local files");
    Ok(())
}

async fn parse_one_file(
    dispatcher: &mut Dispatcher,
    path: &Path,
) -> Result<FileOutcome, PipelineError> {
    let file = File::open(path)
        .await
        .map_err(BinlogParseError::OpenError)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .await
        .map_err(BinlogParseError::OpenError)?;
    if magic != BINLOG_MAGIC {
        return Err(BinlogParseError::BadMagic(magic).into());
    }

    // set by the format description event at the top of every file; when
    // CRC32 is on, each body carries four trailing checksum bytes the
    // decoder must not see
    let mut checksum_len = 0usize;
    let mut first_event = true;

    loop {
        let mut head = [0u8; 19];
        if !read_exact_or_eof(&mut reader, &mut head).await? {
            return Ok(FileOutcome::End);
        }
        let header = EventHeader::parse(&head);
        if header.event_size <= EVENT_HEADER_SIZE {
            return Err(EventParseError::ImpossibleEventSize(header.event_size).into());
        }
        let mut body = vec![0u8; (header.event_size - EVENT_HEADER_SIZE) as usize];
        reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PipelineError::from(EventParseError::EofError)
            } else {
                PipelineError::from(EventParseError::Io(e))
            }
        })?;

        if first_event {
            if header.type_code != TypeCode::FormatDescriptionEvent {
                return Err(BinlogParseError::BadFirstRecord.into());
            }
            first_event = false;
        }
        if header.type_code == TypeCode::FormatDescriptionEvent {
            if let Some(EventData::FormatDescription { checksum, .. }) =
                EventData::from_data(header.type_code, &body, &Default::default())?
            {
                checksum_len = match checksum {
                    ChecksumAlgorithm::CRC32 => 4,
                    _ => 0,
                };
            }
            continue;
        }

        let body_end = body.len().saturating_sub(checksum_len);
        match dispatcher.handle(&header, &body[..body_end]).await? {
            Flow::Stop => return Ok(FileOutcome::Stop),
            Flow::Continue => {}
        }
    }
}

/// Fill `buf` fully, reporting `false` on a clean EOF at an event boundary.
/// EOF in the middle of a header is a short read and therefore an error.
async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<bool, EventParseError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(EventParseError::EofError);
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_exact_or_eof() {
        let mut buf = [0u8; 4];
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(!read_exact_or_eof(&mut empty, &mut buf).await.unwrap());

        let mut full = Cursor::new(vec![1, 2, 3, 4, 5]);
        assert!(read_exact_or_eof(&mut full, &mut buf).await.unwrap());
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut short = Cursor::new(vec![9, 9]);
        assert!(matches!(
            read_exact_or_eof(&mut short, &mut buf).await,
            Err(EventParseError::EofError)
        ));
    }
}
