// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Kernel ids of the logging process and thread

/// Kernel id of a thread or thread group
pub type ThreadId = u32;

thread_local! {
    // Safety: gettid(2) never fails
    static TID: ThreadId = unsafe { libc::gettid() as ThreadId };
}

/// Id of the calling thread, looked up once per thread
pub fn id() -> ThreadId {
    TID.with(|tid| *tid)
}

/// Id of the thread group, i.e. the process id
pub fn group_id() -> ThreadId {
    std::process::id()
}
