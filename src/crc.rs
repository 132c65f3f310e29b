//! Checksum support for the PDU trailer CRC and the CFDP file checksum.
use core::fmt::{Debug, Formatter};

/// CRC algorithm used for the optional 16-bit PDU trailer checksum, specified
/// in CFDP chapter 4.1.1 (CRC-16/IBM-3740, also known as CCITT-FALSE).
pub const CRC_CCITT_FALSE: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// CRC algorithm for the 32-bit CFDP file checksum, checksum type 3 of the
/// [SANA checksum registry](https://sanaregistry.org/r/checksum_identifiers/).
/// Polynomial 0x04C11DB7 with the common reflected/inverted parametrisation.
pub static CRC_32_CFDP: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Incremental file checksum state.
///
/// Receive transactions digest file content over multiple wakeups, so the
/// running digest state has to live inside the transaction record.
pub struct FileChecksum {
    digest: Option<crc::Digest<'static, u32>>,
}

impl FileChecksum {
    pub fn new() -> Self {
        Self {
            digest: Some(CRC_32_CFDP.digest()),
        }
    }

    /// Digest the next slice of file content, in stream order.
    pub fn update(&mut self, data: &[u8]) {
        if let Some(digest) = self.digest.as_mut() {
            digest.update(data);
        }
    }

    /// Consume the running state and return the final checksum value. The
    /// state is re-initialized so the instance can be reused.
    pub fn finalize(&mut self) -> u32 {
        let value = self
            .digest
            .take()
            .unwrap_or_else(|| CRC_32_CFDP.digest())
            .finalize();
        self.digest = Some(CRC_32_CFDP.digest());
        value
    }

    /// Discard any digested state.
    pub fn reset(&mut self) {
        self.digest = Some(CRC_32_CFDP.digest());
    }
}

impl Default for FileChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for FileChecksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileChecksum").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_vs_chunked_digest() {
        let data = b"0123456789abcdef";
        let full = CRC_32_CFDP.checksum(data);
        let mut incremental = FileChecksum::new();
        incremental.update(&data[0..5]);
        incremental.update(&data[5..11]);
        incremental.update(&data[11..]);
        assert_eq!(incremental.finalize(), full);
    }

    #[test]
    fn test_finalize_reinitializes() {
        let mut checksum = FileChecksum::new();
        checksum.update(b"abc");
        let first = checksum.finalize();
        checksum.update(b"abc");
        assert_eq!(checksum.finalize(), first);
    }

    #[test]
    fn test_reset() {
        let mut checksum = FileChecksum::new();
        checksum.update(b"garbage");
        checksum.reset();
        checksum.update(b"abc");
        assert_eq!(checksum.finalize(), CRC_32_CFDP.checksum(b"abc"));
    }

    #[test]
    fn test_known_crc32_vector() {
        // Standard check value for CRC-32/ISO-HDLC.
        assert_eq!(CRC_32_CFDP.checksum(b"123456789"), 0xCBF43926);
    }
}
