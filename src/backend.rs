//! Compute kernel backend.
//!
//! The stages talk to an abstract backend: typed buffer allocation, named
//! kernel dispatch over a 2D index space with positional arguments and an
//! explicit predecessor-event list, and blocking read-back. The contract
//! mirrors a GPU command queue, so a GPU target can implement it without
//! touching stage logic; `CpuBackend` is the portable realization that
//! runs each kernel synchronously with rayon data-parallelism inside.
//!
//! Chained dispatches within one stage must pass the completion tokens of
//! their predecessors: the ordering contract is part of the API even when
//! a particular backend happens to execute synchronously.

use std::cell::{Cell, RefCell};

use crate::error::KernelFault;
use crate::kernels;

/// Opaque handle to a device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

/// Completion token for one dispatch, used to order later work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventToken(usize);

/// The named compute programs the pipeline dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// dst f32, width i32, height i32, sub_seed i32, scale f32, amplitude f32
    NoiseOctave,
    /// dst f32 (in place), width i32, height i32
    IslandFilter,
    /// src f32, dst f32, radius i32, width i32, height i32
    BoxMean,
    /// gx f32, gy f32, dst u8, width i32, height i32
    SlopeDirection,
    /// directions u8, visits u32, starts_x u32, starts_y u32,
    /// width i32, height i32, max_steps u32 — shape is (starts, 1)
    TraceRivers,
    /// elevation f32, r u8, g u8, b u8, band_start f32, band_end f32,
    /// start_rgb, end_rgb, width i32, height i32
    ColorBand,
}

/// A positionally bound kernel argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelArg {
    Buffer(BufferId),
    I32(i32),
    U32(u32),
    F32(f32),
    Rgb([u8; 3]),
}

/// Execution context for the pipeline's numeric kernels.
pub trait KernelBackend {
    fn upload_f32(&self, data: Vec<f32>) -> BufferId;
    fn alloc_f32(&self, len: usize) -> BufferId;
    fn upload_u8(&self, data: Vec<u8>) -> BufferId;
    fn alloc_u8(&self, len: usize) -> BufferId;
    fn upload_u32(&self, data: Vec<u32>) -> BufferId;
    fn alloc_u32(&self, len: usize) -> BufferId;

    /// Free a buffer. Stages release their buffers once the read-back
    /// has landed; releasing an unknown or already released handle is a
    /// no-op.
    fn release(&self, buffer: BufferId);

    /// Enqueue `kernel` over a `(width, height)` index space, ordered
    /// after every token in `wait_for`. Signature violations and shape
    /// mismatches are fatal faults, never retried.
    fn dispatch(
        &self,
        kernel: Kernel,
        shape: (usize, usize),
        args: &[KernelArg],
        wait_for: &[EventToken],
    ) -> Result<EventToken, KernelFault>;

    /// Block until `wait_for` completes, then copy the buffer to host.
    fn read_f32(&self, buffer: BufferId, wait_for: &[EventToken]) -> Result<Vec<f32>, KernelFault>;
    fn read_u8(&self, buffer: BufferId, wait_for: &[EventToken]) -> Result<Vec<u8>, KernelFault>;
    fn read_u32(&self, buffer: BufferId, wait_for: &[EventToken]) -> Result<Vec<u32>, KernelFault>;
}

enum HostBuffer {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U32(Vec<u32>),
}

/// Synchronous CPU backend.
///
/// Buffers live in host memory; each dispatch runs to completion before
/// returning, so every issued token is already complete — wait lists are
/// still validated so stage code that forgets to chain is caught here
/// rather than racing on a real device. Keeps a dispatch log so tests can
/// assert exactly which kernels ran.
#[derive(Default)]
pub struct CpuBackend {
    buffers: RefCell<Vec<Option<HostBuffer>>>,
    free_slots: RefCell<Vec<usize>>,
    issued_events: Cell<usize>,
    dispatch_log: RefCell<Vec<Kernel>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total dispatches since construction.
    pub fn dispatch_count(&self) -> usize {
        self.dispatch_log.borrow().len()
    }

    /// Dispatches of one specific kernel since construction.
    pub fn dispatch_count_of(&self, kernel: Kernel) -> usize {
        self.dispatch_log.borrow().iter().filter(|&&k| k == kernel).count()
    }

    /// Buffers currently allocated and not released.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.borrow().iter().filter(|slot| slot.is_some()).count()
    }

    fn insert(&self, buffer: HostBuffer) -> BufferId {
        let mut buffers = self.buffers.borrow_mut();
        if let Some(slot) = self.free_slots.borrow_mut().pop() {
            buffers[slot] = Some(buffer);
            return BufferId(slot);
        }
        buffers.push(Some(buffer));
        BufferId(buffers.len() - 1)
    }

    /// Validate buffer arguments before any of them is detached for a
    /// kernel body: all live, expected element type, no aliasing. After
    /// this passes, the per-arm takes cannot fail and a later fault
    /// cannot strand an already-taken buffer.
    fn check_buffers(
        &self,
        kernel: Kernel,
        bindings: &[(BufferId, &'static str)],
    ) -> Result<(), KernelFault> {
        let buffers = self.buffers.borrow();
        for (i, &(id, expected)) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|&(seen, _)| seen == id) {
                return Err(KernelFault::BadSignature {
                    kernel,
                    reason: format!("buffer {:?} bound more than once", id),
                });
            }
            let slot = buffers
                .get(id.0)
                .and_then(Option::as_ref)
                .ok_or(KernelFault::UnknownBuffer(id))?;
            let actual = match slot {
                HostBuffer::F32(_) => "f32",
                HostBuffer::U8(_) => "u8",
                HostBuffer::U32(_) => "u32",
            };
            if actual != expected {
                return Err(KernelFault::TypeMismatch { buffer: id, expected });
            }
        }
        Ok(())
    }

    fn take(&self, id: BufferId) -> Result<HostBuffer, KernelFault> {
        self.buffers
            .borrow_mut()
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(KernelFault::UnknownBuffer(id))
    }

    fn put_back(&self, id: BufferId, buffer: HostBuffer) {
        self.buffers.borrow_mut()[id.0] = Some(buffer);
    }

    fn take_f32(&self, id: BufferId) -> Result<Vec<f32>, KernelFault> {
        match self.take(id)? {
            HostBuffer::F32(data) => Ok(data),
            other => {
                self.put_back(id, other);
                Err(KernelFault::TypeMismatch { buffer: id, expected: "f32" })
            }
        }
    }

    fn take_u8(&self, id: BufferId) -> Result<Vec<u8>, KernelFault> {
        match self.take(id)? {
            HostBuffer::U8(data) => Ok(data),
            other => {
                self.put_back(id, other);
                Err(KernelFault::TypeMismatch { buffer: id, expected: "u8" })
            }
        }
    }

    fn take_u32(&self, id: BufferId) -> Result<Vec<u32>, KernelFault> {
        match self.take(id)? {
            HostBuffer::U32(data) => Ok(data),
            other => {
                self.put_back(id, other);
                Err(KernelFault::TypeMismatch { buffer: id, expected: "u32" })
            }
        }
    }

    fn check_events(&self, wait_for: &[EventToken]) -> Result<(), KernelFault> {
        for &token in wait_for {
            if token.0 >= self.issued_events.get() {
                return Err(KernelFault::UnknownEvent(token));
            }
        }
        Ok(())
    }

    fn issue_event(&self, kernel: Kernel) -> EventToken {
        self.dispatch_log.borrow_mut().push(kernel);
        let token = EventToken(self.issued_events.get());
        self.issued_events.set(token.0 + 1);
        token
    }
}

/// Positional argument decoder; arity or type mismatch is a fault.
struct ArgReader<'a> {
    kernel: Kernel,
    args: &'a [KernelArg],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    fn new(kernel: Kernel, args: &'a [KernelArg]) -> Self {
        Self { kernel, args, pos: 0 }
    }

    fn fault(&self, reason: String) -> KernelFault {
        KernelFault::BadSignature { kernel: self.kernel, reason }
    }

    fn next(&mut self, expected: &str) -> Result<KernelArg, KernelFault> {
        let arg = self
            .args
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.fault(format!("missing argument {} ({})", self.pos, expected)))?;
        self.pos += 1;
        Ok(arg)
    }

    fn buffer(&mut self) -> Result<BufferId, KernelFault> {
        match self.next("buffer")? {
            KernelArg::Buffer(id) => Ok(id),
            other => Err(self.fault(format!("argument {}: expected buffer, got {:?}", self.pos - 1, other))),
        }
    }

    fn i32(&mut self) -> Result<i32, KernelFault> {
        match self.next("i32")? {
            KernelArg::I32(v) => Ok(v),
            other => Err(self.fault(format!("argument {}: expected i32, got {:?}", self.pos - 1, other))),
        }
    }

    fn u32(&mut self) -> Result<u32, KernelFault> {
        match self.next("u32")? {
            KernelArg::U32(v) => Ok(v),
            other => Err(self.fault(format!("argument {}: expected u32, got {:?}", self.pos - 1, other))),
        }
    }

    fn f32(&mut self) -> Result<f32, KernelFault> {
        match self.next("f32")? {
            KernelArg::F32(v) => Ok(v),
            other => Err(self.fault(format!("argument {}: expected f32, got {:?}", self.pos - 1, other))),
        }
    }

    fn rgb(&mut self) -> Result<[u8; 3], KernelFault> {
        match self.next("rgb")? {
            KernelArg::Rgb(v) => Ok(v),
            other => Err(self.fault(format!("argument {}: expected rgb, got {:?}", self.pos - 1, other))),
        }
    }

    fn finish(self) -> Result<(), KernelFault> {
        if self.pos != self.args.len() {
            return Err(self.fault(format!(
                "expected {} arguments, got {}",
                self.pos,
                self.args.len()
            )));
        }
        Ok(())
    }
}

impl KernelBackend for CpuBackend {
    fn upload_f32(&self, data: Vec<f32>) -> BufferId {
        self.insert(HostBuffer::F32(data))
    }

    fn alloc_f32(&self, len: usize) -> BufferId {
        self.insert(HostBuffer::F32(vec![0.0; len]))
    }

    fn upload_u8(&self, data: Vec<u8>) -> BufferId {
        self.insert(HostBuffer::U8(data))
    }

    fn alloc_u8(&self, len: usize) -> BufferId {
        self.insert(HostBuffer::U8(vec![0; len]))
    }

    fn upload_u32(&self, data: Vec<u32>) -> BufferId {
        self.insert(HostBuffer::U32(data))
    }

    fn alloc_u32(&self, len: usize) -> BufferId {
        self.insert(HostBuffer::U32(vec![0; len]))
    }

    fn release(&self, buffer: BufferId) {
        let mut buffers = self.buffers.borrow_mut();
        if let Some(slot) = buffers.get_mut(buffer.0) {
            if slot.take().is_some() {
                self.free_slots.borrow_mut().push(buffer.0);
            }
        }
    }

    fn dispatch(
        &self,
        kernel: Kernel,
        shape: (usize, usize),
        args: &[KernelArg],
        wait_for: &[EventToken],
    ) -> Result<EventToken, KernelFault> {
        self.check_events(wait_for)?;
        let (shape_w, shape_h) = shape;
        if shape_w == 0 || shape_h == 0 {
            return Err(KernelFault::InvalidShape { width: shape_w, height: shape_h });
        }
        let mut reader = ArgReader::new(kernel, args);

        match kernel {
            Kernel::NoiseOctave => {
                let dst = reader.buffer()?;
                let width = reader.i32()? as usize;
                let height = reader.i32()? as usize;
                let sub_seed = reader.i32()?;
                let scale = reader.f32()? as f64;
                let amplitude = reader.f32()?;
                reader.finish()?;

                let mut data = self.take_f32(dst)?;
                let result = kernels::noise_octave(&mut data, width, height, sub_seed, scale, amplitude);
                self.put_back(dst, HostBuffer::F32(data));
                result?;
            }
            Kernel::IslandFilter => {
                let dst = reader.buffer()?;
                let width = reader.i32()? as usize;
                let height = reader.i32()? as usize;
                reader.finish()?;

                let mut data = self.take_f32(dst)?;
                let result = kernels::island_filter(&mut data, width, height);
                self.put_back(dst, HostBuffer::F32(data));
                result?;
            }
            Kernel::BoxMean => {
                let src = reader.buffer()?;
                let dst = reader.buffer()?;
                let radius = reader.i32()?;
                let width = reader.i32()? as usize;
                let height = reader.i32()? as usize;
                reader.finish()?;
                self.check_buffers(kernel, &[(src, "f32"), (dst, "f32")])?;

                let src_data = self.take_f32(src)?;
                let mut dst_data = self.take_f32(dst)?;
                let result = kernels::box_mean(&src_data, &mut dst_data, radius, width, height);
                self.put_back(src, HostBuffer::F32(src_data));
                self.put_back(dst, HostBuffer::F32(dst_data));
                result?;
            }
            Kernel::SlopeDirection => {
                let gx = reader.buffer()?;
                let gy = reader.buffer()?;
                let dst = reader.buffer()?;
                let width = reader.i32()? as usize;
                let height = reader.i32()? as usize;
                reader.finish()?;
                self.check_buffers(kernel, &[(gx, "f32"), (gy, "f32"), (dst, "u8")])?;

                let gx_data = self.take_f32(gx)?;
                let gy_data = self.take_f32(gy)?;
                let mut dst_data = self.take_u8(dst)?;
                let result = kernels::slope_direction(&gx_data, &gy_data, &mut dst_data, width, height);
                self.put_back(gx, HostBuffer::F32(gx_data));
                self.put_back(gy, HostBuffer::F32(gy_data));
                self.put_back(dst, HostBuffer::U8(dst_data));
                result?;
            }
            Kernel::TraceRivers => {
                let directions = reader.buffer()?;
                let visits = reader.buffer()?;
                let starts_x = reader.buffer()?;
                let starts_y = reader.buffer()?;
                let width = reader.i32()? as usize;
                let height = reader.i32()? as usize;
                let max_steps = reader.u32()?;
                reader.finish()?;
                self.check_buffers(
                    kernel,
                    &[
                        (directions, "u8"),
                        (visits, "u32"),
                        (starts_x, "u32"),
                        (starts_y, "u32"),
                    ],
                )?;

                let dir_data = self.take_u8(directions)?;
                let mut visit_data = self.take_u32(visits)?;
                let sx_data = self.take_u32(starts_x)?;
                let sy_data = self.take_u32(starts_y)?;
                let result = kernels::trace_rivers(
                    &dir_data,
                    &mut visit_data,
                    &sx_data,
                    &sy_data,
                    width,
                    height,
                    max_steps,
                );
                self.put_back(directions, HostBuffer::U8(dir_data));
                self.put_back(visits, HostBuffer::U32(visit_data));
                self.put_back(starts_x, HostBuffer::U32(sx_data));
                self.put_back(starts_y, HostBuffer::U32(sy_data));
                result?;
            }
            Kernel::ColorBand => {
                let elevation = reader.buffer()?;
                let r = reader.buffer()?;
                let g = reader.buffer()?;
                let b = reader.buffer()?;
                let band_start = reader.f32()?;
                let band_end = reader.f32()?;
                let start_rgb = reader.rgb()?;
                let end_rgb = reader.rgb()?;
                let width = reader.i32()? as usize;
                let height = reader.i32()? as usize;
                reader.finish()?;
                self.check_buffers(
                    kernel,
                    &[(elevation, "f32"), (r, "u8"), (g, "u8"), (b, "u8")],
                )?;

                let elev_data = self.take_f32(elevation)?;
                let mut r_data = self.take_u8(r)?;
                let mut g_data = self.take_u8(g)?;
                let mut b_data = self.take_u8(b)?;
                let result = kernels::color_band(
                    &elev_data,
                    &mut r_data,
                    &mut g_data,
                    &mut b_data,
                    band_start,
                    band_end,
                    start_rgb,
                    end_rgb,
                    width,
                    height,
                );
                self.put_back(elevation, HostBuffer::F32(elev_data));
                self.put_back(r, HostBuffer::U8(r_data));
                self.put_back(g, HostBuffer::U8(g_data));
                self.put_back(b, HostBuffer::U8(b_data));
                result?;
            }
        }

        Ok(self.issue_event(kernel))
    }

    fn read_f32(&self, buffer: BufferId, wait_for: &[EventToken]) -> Result<Vec<f32>, KernelFault> {
        self.check_events(wait_for)?;
        let data = self.take_f32(buffer)?;
        self.put_back(buffer, HostBuffer::F32(data.clone()));
        Ok(data)
    }

    fn read_u8(&self, buffer: BufferId, wait_for: &[EventToken]) -> Result<Vec<u8>, KernelFault> {
        self.check_events(wait_for)?;
        let data = self.take_u8(buffer)?;
        self.put_back(buffer, HostBuffer::U8(data.clone()));
        Ok(data)
    }

    fn read_u32(&self, buffer: BufferId, wait_for: &[EventToken]) -> Result<Vec<u32>, KernelFault> {
        self.check_events(wait_for)?;
        let data = self.take_u32(buffer)?;
        self.put_back(buffer, HostBuffer::U32(data.clone()));
        Ok(data)
    }
}
