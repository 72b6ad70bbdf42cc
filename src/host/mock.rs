// SPDX-License-Identifier: Apache-2.0

//! A recording host for unit tests

use super::{Host, InfoClass, RawHandle, Status};
use crate::handle::info::{self, HandleFlagInformation};
use crate::handle::HandleFlags;
use crate::{Error, Limits, Result};

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ptr::NonNull;
use std::rc::Rc;

#[derive(Debug, Default)]
struct State {
    live: usize,
    refuse: bool,
    limits: Option<Limits>,
    closed: Vec<RawHandle>,
    failing: BTreeSet<RawHandle>,
    unqueryable: BTreeSet<RawHandle>,
    flags: BTreeMap<RawHandle, HandleFlags>,
    types: BTreeMap<RawHandle, String>,
    queries: Vec<(RawHandle, InfoClass)>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MockHost(Rc<RefCell<State>>);

impl MockHost {
    pub fn live_allocations(&self) -> usize {
        self.0.borrow().live
    }

    pub fn refuse_allocations(&self, refuse: bool) {
        self.0.borrow_mut().refuse = refuse;
    }

    pub fn set_limits(&self, limits: Limits) {
        self.0.borrow_mut().limits = Some(limits);
    }

    /// Makes every close of `handle` fail with `EIO`.
    pub fn fail_close(&self, handle: RawHandle) {
        self.0.borrow_mut().failing.insert(handle);
    }

    /// Makes every object information query on `handle` fail with `EACCES`.
    pub fn fail_queries(&self, handle: RawHandle) {
        self.0.borrow_mut().unqueryable.insert(handle);
    }

    pub fn closed(&self) -> Vec<RawHandle> {
        self.0.borrow().closed.clone()
    }

    pub fn set_type_name(&self, handle: RawHandle, name: &str) {
        self.0.borrow_mut().types.insert(handle, name.into());
    }

    pub fn flags(&self, handle: RawHandle) -> HandleFlags {
        self.0
            .borrow()
            .flags
            .get(&handle)
            .copied()
            .unwrap_or_default()
    }

    pub fn queries(&self) -> Vec<(RawHandle, InfoClass)> {
        self.0.borrow().queries.clone()
    }
}

impl Host for MockHost {
    fn limits(&self) -> Limits {
        self.0.borrow().limits.unwrap_or_default()
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let mut state = self.0.borrow_mut();
        if state.refuse {
            return Err(Error::AllocationFailure { size });
        }

        let ptr = unsafe { libc::malloc(size) };
        let ptr = NonNull::new(ptr.cast()).ok_or(Error::AllocationFailure { size })?;
        state.live += 1;
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _size: usize) {
        self.0.borrow_mut().live -= 1;
        libc::free(ptr.as_ptr().cast())
    }

    fn close_handle(&self, handle: RawHandle) -> Status {
        let mut state = self.0.borrow_mut();
        state.closed.push(handle);

        if state.failing.contains(&handle) {
            return Status::from_errno(libc::EIO);
        }

        if state
            .flags
            .get(&handle)
            .map_or(false, |f| f.contains(HandleFlags::PROTECT_FROM_CLOSE))
        {
            return Status::from_errno(libc::EPERM);
        }

        Status::SUCCESS
    }

    fn query_object_info(
        &self,
        handle: RawHandle,
        class: InfoClass,
        buffer: &mut [u8],
    ) -> (Status, usize) {
        let mut state = self.0.borrow_mut();
        state.queries.push((handle, class));

        if state.unqueryable.contains(&handle) {
            return (Status::from_errno(libc::EACCES), 0);
        }

        match class {
            InfoClass::HandleFlags => {
                let flags = state.flags.get(&handle).copied().unwrap_or_default();
                info::encode(buffer, &HandleFlagInformation::from(flags))
            }
            InfoClass::TypeInformation => match state.types.get(&handle) {
                Some(name) => info::encode_type_name(buffer, name),
                None => (Status::from_errno(libc::EBADF), 0),
            },
        }
    }

    fn set_object_info(&self, handle: RawHandle, class: InfoClass, buffer: &[u8]) -> Status {
        match class {
            InfoClass::HandleFlags => match info::decode::<HandleFlagInformation>(buffer) {
                Ok(information) => {
                    let flags = HandleFlags::from(information);
                    self.0.borrow_mut().flags.insert(handle, flags);
                    Status::SUCCESS
                }
                Err(status) => status,
            },
            InfoClass::TypeInformation => Status::from_errno(libc::EINVAL),
        }
    }
}
