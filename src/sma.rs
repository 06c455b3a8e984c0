//! Simple Memory Access: the core's byte-addressable port to the memory
//! hierarchy, the 2-to-1 read arbiter and the store-queue byte bypass.

use crate::store_queue::{StoreQueue, WriteType};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadType {
    Byte,
    Half,
    Word,
}

impl ReadType {
    pub fn bytes(self) -> u32 {
        match self {
            ReadType::Byte => 1,
            ReadType::Half => 2,
            ReadType::Word => 4,
        }
    }

    /// Byte-enable mask over the 4-byte bypass window.
    fn strobe_mask(self) -> u8 {
        match self {
            ReadType::Byte => 0b0001,
            ReadType::Half => 0b0011,
            ReadType::Word => 0b1111,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: u32,
    pub ty: ReadType,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub data: u32,
    pub error: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub address: u32,
    pub ty: WriteType,
    pub data: u32,
}

/// Read side of the SMA port. Polled once per cycle while a request is
/// outstanding; `None` means not ready this cycle, and the caller must
/// repeat the same request until it completes.
pub trait SmaReader {
    fn read(&mut self, req: ReadRequest) -> Option<ReadResponse>;
}

/// Write side of the SMA port. Returns false while the sink is busy.
pub trait SmaWriter {
    fn write(&mut self, req: WriteRequest) -> bool;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Requester {
    First,
    Second,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ArbiterState {
    Idle,
    Pending1,
    Pending2,
}

/// Fixed-priority 2-to-1 arbiter for the shared read port. Requester 1
/// wins at idle; once a grant is made it is held until the grantee's
/// ready pulse, so a mid-transaction requester is never starved out.
#[derive(Debug, Clone)]
pub struct ReadArbiter {
    state: ArbiterState,
}

impl ReadArbiter {
    pub fn new() -> Self {
        Self {
            state: ArbiterState::Idle,
        }
    }

    /// One cycle: request lines in, grant out. `ready` is the downstream
    /// completion pulse for the transaction in flight.
    pub fn tick(&mut self, req1: bool, req2: bool, ready: bool) -> Option<Requester> {
        let grant = match self.state {
            ArbiterState::Idle => {
                if req1 {
                    self.state = ArbiterState::Pending1;
                    Some(Requester::First)
                } else if req2 {
                    self.state = ArbiterState::Pending2;
                    Some(Requester::Second)
                } else {
                    None
                }
            }
            ArbiterState::Pending1 => Some(Requester::First),
            ArbiterState::Pending2 => Some(Requester::Second),
        };

        if ready && grant.is_some() {
            self.state = ArbiterState::Idle;
        }

        grant
    }
}

impl Default for ReadArbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte-wise overlay: byte k of the output comes from `bypass` when strobe
/// bit k is set, from `fetched` otherwise.
pub fn bypass_merge(fetched: u32, bypass: u32, strobe: u8) -> u32 {
    let mut out = fetched.to_le_bytes();
    let alt = bypass.to_le_bytes();
    for k in 0..4 {
        if strobe & (1 << k) != 0 {
            out[k] = alt[k];
        }
    }
    u32::from_le_bytes(out)
}

/// Overlay in-flight store bytes onto a completed read. Errors pass
/// through unchanged; the bypass never clears them.
pub fn apply_bypass(resp: ReadResponse, stores: &StoreQueue, req: ReadRequest) -> ReadResponse {
    if resp.error {
        return resp;
    }

    let (data, strobe) = stores.bypass(req.address);
    ReadResponse {
        data: bypass_merge(resp.data, data, strobe & req.ty.strobe_mask()),
        error: false,
    }
}

/// A read requester view that slots between the memory pipeline and the
/// arbiter: the address goes through unchanged, the fetched bytes come
/// back overlaid with the youngest in-flight store data.
pub struct BypassReader<'a> {
    pub inner: &'a mut dyn SmaReader,
    pub stores: &'a StoreQueue,
}

impl SmaReader for BypassReader<'_> {
    fn read(&mut self, req: ReadRequest) -> Option<ReadResponse> {
        let resp = self.inner.read(req)?;
        Some(apply_bypass(resp, self.stores, req))
    }
}

/// Flat little-endian memory behind the SMA port, always ready. Accesses
/// outside the backing range answer with the error line raised.
#[derive(Debug, Clone)]
pub struct Ram {
    base: u32,
    mem: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Self::with_base(0, size)
    }

    pub fn with_base(base: u32, size: usize) -> Self {
        Self {
            base,
            mem: vec![0; size],
        }
    }

    fn offset(&self, address: u32, len: u32) -> Option<usize> {
        let start = address.checked_sub(self.base)? as usize;
        let end = start.checked_add(len as usize)?;
        (end <= self.mem.len()).then_some(start)
    }

    pub fn readw(&self, address: u32) -> u32 {
        let a = self.offset(address, 4).expect("readw out of range");
        u32::from_le_bytes(self.mem[a..a + 4].try_into().unwrap())
    }

    pub fn writew(&mut self, address: u32, value: u32) {
        let a = self.offset(address, 4).expect("writew out of range");
        self.mem[a..a + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl SmaReader for Ram {
    fn read(&mut self, req: ReadRequest) -> Option<ReadResponse> {
        let len = req.ty.bytes();
        let Some(a) = self.offset(req.address, len) else {
            return Some(ReadResponse {
                data: 0,
                error: true,
            });
        };

        let mut bytes = [0u8; 4];
        bytes[..len as usize].copy_from_slice(&self.mem[a..a + len as usize]);
        Some(ReadResponse {
            data: u32::from_le_bytes(bytes),
            error: false,
        })
    }
}

impl SmaWriter for Ram {
    fn write(&mut self, req: WriteRequest) -> bool {
        let len = req.ty.bytes();
        let Some(a) = self.offset(req.address, len) else {
            // Writes to nowhere are dropped; faults were already decided
            // at translation time.
            return true;
        };

        self.mem[a..a + len as usize].copy_from_slice(&req.data.to_le_bytes()[..len as usize]);
        true
    }
}
