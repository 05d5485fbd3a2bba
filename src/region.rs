use std::{io, ptr, ptr::NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGESIZE, c_void};

/// Size of a memory page as reported by the operating system.
pub fn page_size() -> usize {
  let size = unsafe { libc::sysconf(_SC_PAGESIZE) };
  if size <= 0 { 4096 } else { size as usize }
}

/// A page-aligned anonymous mapping obtained once from the kernel.
///
/// The mapping is private to the process and zero-filled. It is unmapped
/// when the `Region` is dropped.
pub struct Region {
  base: NonNull<u8>,
  len: usize,
}

impl Region {
  /// Maps `capacity_hint` bytes rounded up to whole pages.
  ///
  /// Fails with [`io::ErrorKind::InvalidInput`] when the rounded length does
  /// not fit in a `usize`.
  pub fn reserve(capacity_hint: usize) -> io::Result<Self> {
    let page = page_size();
    let len = capacity_hint
      .max(1)
      .checked_next_multiple_of(page)
      .ok_or_else(|| {
        io::Error::new(
          io::ErrorKind::InvalidInput,
          format!("capacity of {capacity_hint} bytes overflows page rounding"),
        )
      })?;

    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    let base = NonNull::new(address.cast::<u8>())
      .ok_or_else(|| io::Error::other("mmap returned null"))?;

    log::debug!(
      "reserved region of {} bytes (page size {}) at {:?}",
      len,
      page,
      base
    );

    Ok(Self { base, len })
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn end(&self) -> usize {
    self.base.as_ptr() as usize + self.len
  }

  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    let start = self.base.as_ptr() as usize;
    start <= address && address < self.end()
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    let result = unsafe { libc::munmap(self.base.as_ptr().cast::<c_void>(), self.len) };
    if result != 0 {
      log::warn!(
        "munmap of region at {:?} failed: {}",
        self.base,
        io::Error::last_os_error()
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserve_rounds_up_to_pages() {
    let page = page_size();

    let region = Region::reserve(10_000).unwrap();
    assert_eq!(region.len() % page, 0);
    assert!(region.len() >= 10_000);
    assert!(region.len() < 10_000 + page);
    assert_eq!(region.base() as usize % page, 0);
  }

  #[test]
  fn reserve_exact_multiple_keeps_length() {
    let page = page_size();

    let region = Region::reserve(2 * page).unwrap();
    assert_eq!(region.len(), 2 * page);
  }

  #[test]
  fn zero_hint_still_gets_a_page() {
    let region = Region::reserve(0).unwrap();
    assert_eq!(region.len(), page_size());
  }

  #[test]
  fn oversized_hint_is_an_error() {
    let err = Region::reserve(usize::MAX).err().unwrap();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

    let err = Region::reserve(usize::MAX - 1).err().unwrap();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
  }

  #[test]
  fn region_is_zeroed_and_writable() {
    let region = Region::reserve(8192).unwrap();

    unsafe {
      let bytes = std::slice::from_raw_parts_mut(region.base(), region.len());
      assert!(bytes.iter().all(|&b| b == 0));

      bytes[0] = 0xAB;
      bytes[region.len() - 1] = 0xCD;
      assert_eq!(bytes[0], 0xAB);
      assert_eq!(bytes[region.len() - 1], 0xCD);
    }
  }

  #[test]
  fn contains_covers_exactly_the_mapping() {
    let region = Region::reserve(4096).unwrap();
    let base = region.base() as usize;

    assert!(region.contains(base));
    assert!(region.contains(region.end() - 1));
    assert!(!region.contains(region.end()));
    assert!(!region.contains(base - 1));
  }
}
