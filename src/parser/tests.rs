use super::*;
use crate::error::ProtocolError;

fn limits() -> ParserLimits {
    ParserLimits {
        max_part_size: 4096,
        max_header_size: 512,
    }
}

fn jpeg_payload(size: usize, seed: u8) -> Vec<u8> {
    let mut data = vec![seed; size.max(4)];
    data[0] = 0xFF;
    data[1] = 0xD8;
    let len = data.len();
    data[len - 2] = 0xFF;
    data[len - 1] = 0xD9;
    data
}

fn part_with_length(payload: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-ID: 1\r\n\r\n",
        payload.len()
    )
    .into_bytes();
    part.extend_from_slice(payload);
    part.extend_from_slice(b"\r\n");
    part
}

fn part_without_length(payload: &[u8]) -> Vec<u8> {
    let mut part = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
    part.extend_from_slice(payload);
    part.extend_from_slice(b"\r\n");
    part
}

fn body(sizes: &[usize], with_length: bool) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, size) in sizes.iter().enumerate() {
        let payload = jpeg_payload(*size, i as u8);
        if with_length {
            body.extend(part_with_length(&payload));
        } else {
            body.extend(part_without_length(&payload));
        }
    }
    body
}

/// Feed chunks and collect frame lengths plus any errors
fn run<'a>(
    parser: &mut MultipartParser,
    chunks: impl IntoIterator<Item = &'a [u8]>,
) -> (Vec<usize>, Vec<ProtocolError>) {
    let mut frames = Vec::new();
    let mut errors = Vec::new();
    for chunk in chunks {
        parser.push(chunk);
        loop {
            match parser.next_frame() {
                Ok(Some(frame)) => frames.push(frame.length),
                Ok(None) => break,
                Err(e) => errors.push(e),
            }
        }
    }
    (frames, errors)
}

#[test]
fn test_single_chunk_with_content_length() {
    let data = body(&[100, 2000, 37], true);
    let mut parser = MultipartParser::new("frame", limits());

    let (frames, errors) = run(&mut parser, [data.as_slice()]);

    assert_eq!(frames, vec![100, 2000, 37]);
    assert!(errors.is_empty());
    assert_eq!(parser.frames_parsed(), 3);
}

#[test]
fn test_byte_by_byte_matches_single_chunk() {
    for with_length in [true, false] {
        let data = body(&[120, 900, 4, 3000], with_length);

        let mut whole = MultipartParser::new("frame", limits());
        let (expected, errors) = run(&mut whole, [data.as_slice()]);
        assert!(errors.is_empty());

        let mut bytewise = MultipartParser::new("frame", limits());
        let (actual, errors) = run(&mut bytewise, data.chunks(1));
        assert!(errors.is_empty());

        assert_eq!(actual, expected, "with_length = {}", with_length);
    }
}

#[test]
fn test_uneven_chunking_matches_single_chunk() {
    let data = body(&[64, 1500, 700, 10, 2500], true);

    let mut whole = MultipartParser::new("frame", limits());
    let (expected, _) = run(&mut whole, [data.as_slice()]);

    let mut chunks = Vec::new();
    let mut offset = 0;
    let mut size = 1;
    while offset < data.len() {
        let end = (offset + size).min(data.len());
        chunks.push(&data[offset..end]);
        offset = end;
        size = size % 13 + 3;
    }

    let mut split = MultipartParser::new("frame", limits());
    let (actual, errors) = run(&mut split, chunks);

    assert!(errors.is_empty());
    assert_eq!(actual, expected);
}

#[test]
fn test_without_content_length_waits_for_next_delimiter() {
    let payload = jpeg_payload(256, 7);
    let mut parser = MultipartParser::new("frame", limits());

    let (frames, _) = run(&mut parser, [part_without_length(&payload).as_slice()]);
    assert!(frames.is_empty());

    let (frames, errors) = run(&mut parser, [b"--frame\r\n".as_slice()]);
    assert_eq!(frames, vec![256]);
    assert!(errors.is_empty());
}

#[test]
fn test_declared_oversized_part_yields_one_error() {
    let mut data = body(&[100], true);
    data.extend(part_with_length(&jpeg_payload(5000, 1)));
    data.extend(body(&[50], true));

    let mut parser = MultipartParser::new("frame", limits());
    let (frames, errors) = run(&mut parser, data.chunks(7));

    assert_eq!(frames, vec![100]);
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        ProtocolError::PartTooLarge { size: 5000, limit: 4096 }
    ));
    assert_eq!(parser.buffered(), 0);
}

#[test]
fn test_observed_oversized_part_yields_one_error() {
    let mut data = body(&[100], false);
    data.extend(part_without_length(&jpeg_payload(9000, 2)));
    data.extend(body(&[50], false));

    for chunk_size in [1, 512, data.len()] {
        let mut parser = MultipartParser::new("frame", limits());
        let (frames, errors) = run(&mut parser, data.chunks(chunk_size));

        assert_eq!(frames, vec![100], "chunk size {}", chunk_size);
        assert_eq!(errors.len(), 1, "chunk size {}", chunk_size);
        assert!(matches!(errors[0], ProtocolError::PartTooLarge { .. }));
        assert_eq!(parser.buffered(), 0);
    }
}

#[test]
fn test_garbage_instead_of_delimiter() {
    let mut data = body(&[100], true);
    data.extend_from_slice(b"garbage that is not a boundary\r\n");

    let mut parser = MultipartParser::new("frame", limits());
    let (frames, errors) = run(&mut parser, [data.as_slice()]);

    assert_eq!(frames, vec![100]);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ProtocolError::MalformedBoundary { .. }));
}

#[test]
fn test_malformed_headers() {
    let data = b"--frame\r\nthis header has no colon\r\n\r\nxx\r\n".to_vec();
    let mut parser = MultipartParser::new("frame", limits());
    let (_, errors) = run(&mut parser, [data.as_slice()]);
    assert!(matches!(errors[..], [ProtocolError::MalformedHeaders { .. }]));

    let data = b"--frame\r\nContent-Length: lots\r\n\r\nxx\r\n".to_vec();
    let mut parser = MultipartParser::new("frame", limits());
    let (_, errors) = run(&mut parser, [data.as_slice()]);
    assert!(matches!(errors[..], [ProtocolError::MalformedHeaders { .. }]));
}

#[test]
fn test_header_block_too_large() {
    let mut data = b"--frame\r\nX-Padding: ".to_vec();
    data.extend(std::iter::repeat(b'a').take(1024));

    let mut parser = MultipartParser::new("frame", limits());
    let (_, errors) = run(&mut parser, data.chunks(100));

    assert_eq!(errors, vec![ProtocolError::HeaderTooLarge { limit: 512 }]);
}

#[test]
fn test_missing_boundary_in_preamble() {
    let data = vec![b'x'; 2048];
    let mut parser = MultipartParser::new("frame", limits());
    let (_, errors) = run(&mut parser, data.chunks(64));

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ProtocolError::MalformedBoundary { .. }));
}

#[test]
fn test_preamble_and_extra_line_breaks_are_tolerated() {
    let mut data = b"\r\nsome preamble text\r\n".to_vec();
    data.extend(part_with_length(&jpeg_payload(30, 0)));
    data.extend_from_slice(b"\r\n\r\n");
    data.extend(part_with_length(&jpeg_payload(40, 1)));

    let mut parser = MultipartParser::new("frame", limits());
    let (frames, errors) = run(&mut parser, [data.as_slice()]);

    assert_eq!(frames, vec![30, 40]);
    assert!(errors.is_empty());
}

#[test]
fn test_closing_delimiter_finishes_stream() {
    let mut data = body(&[10], true);
    data.extend_from_slice(b"--frame--\r\n");
    data.extend_from_slice(b"trailing epilogue");

    let mut parser = MultipartParser::new("frame", limits());
    let (frames, errors) = run(&mut parser, [data.as_slice()]);

    assert_eq!(frames, vec![10]);
    assert!(errors.is_empty());
    assert!(parser.is_finished());
}

#[test]
fn test_reset_after_error() {
    let mut parser = MultipartParser::new("frame", limits());
    let (_, errors) = run(&mut parser, [b"--frame\r\nbroken\r\n\r\n".as_slice()]);
    assert_eq!(errors.len(), 1);

    // Inert until reset
    let data = body(&[20], true);
    let (frames, errors) = run(&mut parser, [data.as_slice(), b"--frame\r\n".as_slice()]);
    assert!(frames.is_empty());
    assert!(errors.is_empty());

    parser.reset();
    let (frames, errors) = run(&mut parser, [data.as_slice()]);
    assert_eq!(frames, vec![20]);
    assert!(errors.is_empty());
}

#[test]
fn test_dash_prefixed_boundary_with_rfc_delimiters() {
    let mut data = b"----myboundary\r\nContent-Length: 3\r\n\r\nabc\r\n".to_vec();
    data.extend_from_slice(b"----myboundary\r\nContent-Length: 4\r\n\r\nwxyz\r\n");
    data.extend_from_slice(b"----myboundary\r\n\r\nno length\r\n----myboundary--\r\n");

    let mut parser = MultipartParser::new("--myboundary", limits());
    let (frames, errors) = run(&mut parser, [data.as_slice()]);
    assert_eq!(frames, vec![3, 4, 9]);
    assert!(errors.is_empty(), "{:?}", errors);
    assert!(parser.is_finished());

    // Same stream one byte at a time
    let mut parser = MultipartParser::new("--myboundary", limits());
    let (frames, errors) = run(&mut parser, data.chunks(1));
    assert_eq!(frames, vec![3, 4, 9]);
    assert!(errors.is_empty(), "{:?}", errors);
}

#[test]
fn test_reset_forgets_verbatim_delimiter() {
    let verbatim = b"--myboundary\r\nContent-Length: 2\r\n\r\nok\r\n".to_vec();
    let mut parser = MultipartParser::new("--myboundary", limits());
    let (frames, _) = run(&mut parser, [verbatim.as_slice()]);
    assert_eq!(frames, vec![2]);

    parser.reset();
    let mut rfc = b"----myboundary\r\nContent-Length: 2\r\n\r\nok\r\n".to_vec();
    rfc.extend_from_slice(b"----myboundary\r\nContent-Length: 1\r\n\r\nx\r\n");
    let (frames, errors) = run(&mut parser, [rfc.as_slice()]);
    assert_eq!(frames, vec![2, 1]);
    assert!(errors.is_empty(), "{:?}", errors);
}

#[test]
fn test_boundary_with_dash_prefix_used_verbatim() {
    let mut data = b"--myboundary\r\nContent-Length: 5\r\n\r\nhello\r\n".to_vec();
    data.extend_from_slice(b"--myboundary\r\nContent-Length: 3\r\n\r\nabc\r\n");

    let mut parser = MultipartParser::new("--myboundary", limits());
    let (frames, errors) = run(&mut parser, [data.as_slice()]);

    assert_eq!(frames, vec![5, 3]);
    assert!(errors.is_empty());
}

#[test]
fn test_boundary_from_content_type() {
    assert_eq!(
        boundary_from_content_type("multipart/x-mixed-replace; boundary=frame"),
        Some("frame".to_string())
    );
    assert_eq!(
        boundary_from_content_type("multipart/x-mixed-replace;Boundary=\"--myboundary\""),
        Some("--myboundary".to_string())
    );
    assert_eq!(boundary_from_content_type("image/jpeg"), None);
    assert_eq!(
        boundary_from_content_type("multipart/x-mixed-replace; boundary="),
        None
    );

    assert!(is_multipart_replace("multipart/x-mixed-replace; boundary=frame"));
    assert!(!is_multipart_replace("text/html"));
}
