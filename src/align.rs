/// Rounds the given size up to the machine word.
///
/// Every payload handed out by the allocator is word-sized, which keeps
/// each header carved behind it word-aligned as well.
///
/// # Examples
///
/// ```rust
/// use memregion::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, ::core::mem::size_of::<usize>())
  };
}

/// Rounds `value` up to a multiple of `to`, which must be a power of two.
///
/// ```rust
/// use memregion::align_to;
///
/// assert_eq!(align_to!(10_000, 4096), 12_288);
/// assert_eq!(align_to!(8192, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $to:expr) => {
    ($value + $to - 1) & !($to - 1)
  };
}

#[cfg(test)]
mod tests {
  use std::mem;

  #[test]
  fn test_align() {
    let ptr_size = mem::size_of::<usize>();

    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ptr_size * i + 1)..=(ptr_size * (i + 1));

      let expected_alignment = ptr_size * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_to_page() {
    let page = 4096;

    assert_eq!(align_to!(1, page), page);
    assert_eq!(align_to!(page, page), page);
    assert_eq!(align_to!(page + 1, page), 2 * page);
    assert_eq!(align_to!(0, page), 0);
  }
}
