//! Cursor engine (spec §4.G): the save/restore/detach state machine that
//! lets a `RecordCursor` survive a yield point (a WiredTiger cursor becomes
//! invalid once its transaction's snapshot is released) without the caller
//! having to know anything about WiredTiger snapshots.

use crate::engine::EngineCursor;
use crate::error::Result;
use crate::record_id::RecordId;
use crate::uncommitted_ids::UncommittedIds;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Never positioned yet; the next `advance()` does an initial seek.
    Fresh,
    /// Positioned on a live WiredTiger cursor at a known id.
    Positioned(RecordId),
    /// `save()` was called: the id is remembered but the underlying engine
    /// cursor has been reset and may no longer be valid to read from.
    Saved(RecordId),
    /// Ran off the end (or start, for a reverse cursor).
    Eof,
}

/// A single-direction, position-remembering cursor over a record store's
/// visible id range; wraps an `EngineCursor` and filters out ids still
/// hidden by an in-flight uncommitted insert (spec §4.E/§4.G interaction).
pub struct RecordCursor {
    engine: Box<dyn EngineCursor>,
    uncommitted: Arc<UncommittedIds>,
    forward: bool,
    /// Capped collections enforce a "no holes" guarantee for readers: once a
    /// record a cursor was parked on has been evicted/truncated away, the
    /// cursor must stop rather than silently resume past the hole (spec
    /// §4.G restore, property #4).
    capped: bool,
    /// Forward-scanning oplog cursors must not read past the oplog's
    /// visibility ceiling (spec §4.C/§4.G `oplogReadTill`), since a slot
    /// beyond it may still be filled in by a currently-uncommitted writer.
    read_till: Option<RecordId>,
    state: State,
}

impl RecordCursor {
    pub fn new(
        engine: Box<dyn EngineCursor>,
        uncommitted: Arc<UncommittedIds>,
        forward: bool,
        capped: bool,
        read_till: Option<RecordId>,
    ) -> Self {
        Self {
            engine,
            uncommitted,
            forward,
            capped,
            read_till,
            state: State::Fresh,
        }
    }

    fn past_read_till(&self, id: RecordId) -> bool {
        self.forward && matches!(self.read_till, Some(ceiling) if id > ceiling)
    }

    /// Advance to the next visible record, returning its id and value, or
    /// `None` at end of range. Skips over any id currently registered as
    /// uncommitted so a reader never observes a hole opened by a concurrent
    /// in-flight insert, only records that were actually committed before
    /// this cursor's snapshot.
    pub fn advance(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        loop {
            let moved = match self.state {
                State::Fresh => {
                    if self.forward {
                        self.engine.reset()?;
                        self.engine.next()?
                    } else {
                        self.engine.reset()?;
                        self.engine.prev()?
                    }
                }
                State::Positioned(_) => {
                    if self.forward {
                        self.engine.next()?
                    } else {
                        self.engine.prev()?
                    }
                }
                State::Saved(id) => {
                    if self.restore_at(id)? {
                        // Exact position recovered; it was already yielded
                        // before `save()`, so advance past it as usual.
                        continue;
                    }
                    // The saved id is gone. `restore_at` already landed the
                    // engine cursor on the nearest surviving record (or hit
                    // EOF) and updated `self.state` accordingly; that landed
                    // record has never been yielded, so surface it directly
                    // instead of looping into another next()/prev() which
                    // would skip past it.
                    match self.state {
                        State::Positioned(landed) => {
                            if self.uncommitted.is_hidden(landed) || self.past_read_till(landed) {
                                self.state = State::Eof;
                                return Ok(None);
                            }
                            let value = self.engine.get_value()?;
                            return Ok(Some((landed, value)));
                        }
                        State::Eof => return Ok(None),
                        _ => unreachable!("restore_at only sets Positioned or Eof"),
                    }
                }
                State::Eof => return Ok(None),
            };

            if !moved {
                self.state = State::Eof;
                return Ok(None);
            }

            let id = self.engine.get_key()?;
            if self.uncommitted.is_hidden(id) || self.past_read_till(id) {
                // Stop rather than skip: a forward scan must not read past a
                // hole, since the still-uncommitted writer might abort and
                // leave the id permanently missing, or commit and fill it in
                // later. Either way the present cursor treats this as EOF
                // for now.
                self.state = State::Eof;
                return Ok(None);
            }

            self.state = State::Positioned(id);
            let value = self.engine.get_value()?;
            return Ok(Some((id, value)));
        }
    }

    /// Position exactly on `id`, the way `find_record` and `cappedTruncateAfter`
    /// need to without scanning from the start.
    pub fn seek_exact(&mut self, id: RecordId) -> Result<Option<Vec<u8>>> {
        self.engine.set_key(id);
        if self.engine.search()? {
            self.state = State::Positioned(id);
            Ok(Some(self.engine.get_value()?))
        } else {
            self.state = State::Fresh;
            Ok(None)
        }
    }

    /// Remember the current position and release the engine cursor's grip
    /// on the snapshot (`WT_CURSOR::reset`), so the caller can yield without
    /// pinning WiredTiger's oldest-snapshot watermark.
    pub fn save(&mut self) -> Result<()> {
        if let State::Positioned(id) = self.state {
            self.engine.reset()?;
            self.state = State::Saved(id);
        }
        Ok(())
    }

    /// Re-establish position after a `save()`. Returns `false` if the
    /// previously-positioned record no longer exists (it was deleted or
    /// evicted while the cursor was detached).
    pub fn restore(&mut self) -> Result<bool> {
        match self.state {
            State::Saved(id) => Ok(self.restore_at(id)?),
            _ => Ok(true),
        }
    }

    fn restore_at(&mut self, id: RecordId) -> Result<bool> {
        self.engine.set_key(id);
        if self.engine.search()? {
            self.state = State::Positioned(id);
            return Ok(true);
        }
        if self.capped {
            // A capped collection guarantees readers never see a hole: if
            // the exact record this cursor was parked on is gone (evicted
            // or truncated away while detached), the miss is terminal
            // rather than a cue to reposition on whatever survived.
            self.state = State::Eof;
            return Ok(false);
        }
        // The exact record is gone; search_near finds the next nearest
        // position so a forward scan can resume from there.
        match self.engine.search_near()? {
            Some(_) => {
                let landed = self.engine.get_key()?;
                self.state = State::Positioned(landed);
                Ok(false)
            }
            None => {
                self.state = State::Eof;
                Ok(false)
            }
        }
    }

    /// Drops the underlying engine cursor's position without forgetting
    /// which table this cursor reads from — used when a long-running
    /// operation (e.g. capped eviction) needs to free the snapshot pin
    /// entirely rather than merely detach-and-resume.
    pub fn detach(&mut self) -> Result<()> {
        self.engine.reset()?;
        self.state = State::Fresh;
        Ok(())
    }

    pub fn current_id(&self) -> Option<RecordId> {
        match self.state {
            State::Positioned(id) | State::Saved(id) => Some(id),
            State::Fresh | State::Eof => None,
        }
    }
}

/// A cursor over `next_random=true`, used for oplog stone sampling and
/// `Collection.pickRandom()`-style access (spec §4.A/§4.F); has no ordered
/// save/restore state since random cursors are always used one-shot.
pub struct RandomCursor {
    engine: Box<dyn EngineCursor>,
}

impl RandomCursor {
    pub fn new(engine: Box<dyn EngineCursor>) -> Self {
        Self { engine }
    }

    pub fn sample(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        if !self.engine.next()? {
            return Ok(None);
        }
        let id = self.engine.get_key()?;
        let value = self.engine.get_value()?;
        Ok(Some((id, value)))
    }

    /// Random cursors are not save/restore-stable: always reports failure so
    /// the caller re-opens a fresh one rather than trying to resume a
    /// position that was never meaningful across a transaction boundary.
    pub fn restore(&mut self) -> Result<bool> {
        Ok(false)
    }
}
