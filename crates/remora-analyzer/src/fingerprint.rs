//! Region content fingerprinting.

use md5::{Digest, Md5};

use remora_debugger::Region;

use crate::image::MemoryImage;
use crate::Result;

/// Bytes hashed per image access.
const CHUNK: usize = core::mem::size_of::<u64>();

/// MD5 of the region's byte image, streamed word-at-a-time through the
/// memory view.
///
/// The digest is a content-addressed cache key only; nothing about it
/// is a security claim.
pub fn region_md5(image: &dyn MemoryImage, region: &Region) -> Result<[u8; 16]> {
    let mut hasher = Md5::new();
    let mut word = [0u8; CHUNK];

    let mut addr = region.start;

    while addr < region.end {
        let take = ((region.end - addr) as usize).min(CHUNK);

        image.read(addr, &mut word[..take])?;
        hasher.update(&word[..take]);

        addr += take as u64;
    }

    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use md5::{Digest, Md5};
    use remora_debugger::{Permissions, Region};

    use super::region_md5;
    use crate::image::SliceImage;

    fn region(start: u64, len: u64) -> Region {
        Region {
            start,
            end: start + len,
            base: start,
            name: String::new(),
            permissions: Permissions::default(),
        }
    }

    #[test]
    fn digest_matches_whole_buffer_hash() {
        // Deliberately not a multiple of the word size.
        let bytes: Vec<u8> = (0..61u8).collect();
        let image = SliceImage::new(0x1000, &bytes);

        let digest = region_md5(&image, &region(0x1000, bytes.len() as u64)).unwrap();

        let expected: [u8; 16] = Md5::digest(&bytes).into();
        assert_eq!(digest, expected);
    }

    #[test]
    fn digest_is_content_sensitive() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[17] = 1;

        let digest_a = region_md5(&SliceImage::new(0, &a), &region(0, 32)).unwrap();
        let digest_b = region_md5(&SliceImage::new(0, &b), &region(0, 32)).unwrap();

        assert_ne!(digest_a, digest_b);
    }
}
