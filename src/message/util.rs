use std::io::{self, prelude::*};

/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Read a little-endian u64 out of the given stream.
///
pub fn read_u64<R: Read>(stream: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_bytes_array(stream)?))
}

/// Read the given number of bytes from a stream, into a vec.
///
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Read the given (const) number of bytes from a stream, into an array.
///
pub fn read_bytes_array<R: Read, const SIZE: usize>(stream: &mut R) -> io::Result<[u8; SIZE]> {
    let mut buffer = [0; SIZE];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Write a length-prefixed frame to a stream.
///
pub fn write_frame<W: Write>(stream: &mut W, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(&(bytes.len() as u64).to_le_bytes())?;
    stream.write_all(bytes)
}

/// Read a length-prefixed frame from a stream.
///
pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Vec<u8>> {
    let size = read_u64(stream)?;
    read_bytes_vec(stream, size as usize)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn ceil_log2_rounds_up() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn frames_survive_a_byte_stream() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"hello").unwrap();
        write_frame(&mut wire, b"").unwrap();
        let mut cursor = io::Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"hello");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"");
        assert!(read_frame(&mut cursor).is_err());
    }
}
