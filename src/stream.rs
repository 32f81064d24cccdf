//! Byte stream adapters over a group.
//!
//! [`GroupReader`] produces the serialized group lazily, one child at a time.
//! [`GroupWriter`] accepts bytes in arbitrary pieces and, each time a whole
//! framed group has arrived, replaces the target group's sub-type and
//! children with the decoded ones. Replaced children are detached, not
//! released.

use crate::prelude::*;
use byteorder::ByteOrder;
use std::io;

impl Tree {
    pub fn reader(&self, group: NodeId) -> GroupReader<'_> {
        GroupReader {
            tree: self,
            group,
            pending: Vec::new(),
            position: 0,
            next_child: None,
        }
    }

    pub fn writer(&mut self, group: NodeId) -> GroupWriter<'_> {
        GroupWriter {
            tree: self,
            target: group,
            buffer: Vec::new(),
            frames: 0,
        }
    }
}

pub struct GroupReader<'a> {
    tree: &'a Tree,
    group: NodeId,
    pending: Vec<u8>,
    position: usize,
    // None until the header has been produced
    next_child: Option<usize>,
}

impl GroupReader<'_> {
    /// Loads the next piece into `pending`. Returns false at the end.
    fn refill(&mut self) -> R<bool> {
        let index = match self.next_child {
            None => {
                self.pending = self.tree.header(self.group)?.to_vec();
                self.next_child = Some(0);
                return Ok(true);
            }
            Some(index) => index,
        };

        let Some(&child) = self.tree.children(self.group)?.get(index) else {
            return Ok(false);
        };
        self.pending = self.tree.to_bytes(child)?;
        self.next_child = Some(index + 1);
        Ok(true)
    }
}

impl Read for GroupReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position >= self.pending.len() {
            self.position = 0;
            self.pending.clear();
            if !self.refill().map_err(io::Error::other)? {
                return Ok(0);
            }
        }

        let available = &self.pending[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

pub struct GroupWriter<'a> {
    tree: &'a mut Tree,
    target: NodeId,
    buffer: Vec<u8>,
    frames: usize,
}

impl GroupWriter<'_> {
    /// Number of complete groups received so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Bytes received that do not form a complete group yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn frame_len(&self) -> Option<usize> {
        if self.buffer.len() < HEADER_SIZE {
            return None;
        }
        let size = BigEndian::read_u32(&self.buffer[4..8]) as usize;
        Some(HEADER_SIZE + size)
    }

    fn drain_frames(&mut self) -> R<()> {
        while let Some(len) = self.frame_len() {
            if self.buffer.len() < len {
                break;
            }
            let frame: Vec<u8> = self.buffer.drain(..len).collect();
            self.replace(&frame)?;
        }
        Ok(())
    }

    fn replace(&mut self, frame: &[u8]) -> R<()> {
        let tree = &mut *self.tree;
        let parsed = tree.parse(frame)?;

        // replaced children stay alive, detached, for callers holding them
        tree.clear(self.target)?;
        let subtype = tree.group(parsed)?.subtype();
        tree.set_subtype(self.target, subtype)?;

        let children = tree.to_array(parsed)?;
        let count = tree.append(self.target, children)?;
        tree.release(parsed)?;

        self.frames += 1;
        dprintln!("stream frame {}: {} children", self.frames, count);
        Ok(())
    }

    /// Ends the stream. Fails if a partial group is still buffered.
    /// Returns the number of groups received.
    pub fn finish(self) -> R<usize> {
        if !self.buffer.is_empty() {
            bail!(
                "Stream ended with {} bytes of an incomplete group",
                self.buffer.len()
            );
        }
        Ok(self.frames)
    }
}

impl Write for GroupWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.drain_frames().map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
