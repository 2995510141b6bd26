use anyhow::{anyhow, Result};
use std::alloc::{alloc, dealloc, Layout};

//------------------------------------------

// Verification reads bypass the page cache, so the read buffers have to
// be aligned.  The contents are never looked at.
pub struct Buffer {
    layout: Layout,
    data: *mut u8,
}

impl Buffer {
    pub fn new(size: usize, align: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|e| anyhow!("bad buffer layout ({} bytes): {}", size, e))?;
        if layout.size() == 0 {
            return Err(anyhow!("zero length buffer"));
        }

        let data = unsafe { alloc(layout) };
        if data.is_null() {
            return Err(anyhow!("out of memory allocating {} byte buffer", size));
        }

        Ok(Self { layout, data })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn get_data(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.layout.size()) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data, self.layout);
        }
    }
}

unsafe impl Send for Buffer {}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_aligned() {
        let mut b = Buffer::new(8192, 4096).unwrap();
        assert_eq!(b.len(), 8192);
        assert_eq!(b.get_data().as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn zero_length_is_refused() {
        assert!(Buffer::new(0, 4096).is_err());
    }
}

//------------------------------------------
