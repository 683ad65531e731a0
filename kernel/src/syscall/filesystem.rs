//! 300-series: VFS. Path-taking calls resolve against the caller's working
//! directory; handle-taking calls index into the caller's own open-node /
//! open-directory-stream tables (`process::pcb::Application`), so one
//! process can never touch another's handles.

extern crate alloc;

use alloc::string::String;

use crate::fs::{self, fat32::IterMode, NodeInfo, OpenMode, OpenedNode};
use crate::process::{cwd, Application};

use super::status::Status;
use super::validation::write_user_bytes;

/// Wire layout `get_node_info`/`directory_stream_next` write to the
/// caller's output buffer: a fixed-size record rather than a
/// variable-length one, so the validation contract only ever needs one
/// length (this constant) rather than a second round trip to learn the
/// name's length first.
const NODE_INFO_RECORD_LEN: usize = 4 + 1 + 1 + 255;

fn encode_node_info(info: &NodeInfo) -> [u8; NODE_INFO_RECORD_LEN] {
    let mut record = [0u8; NODE_INFO_RECORD_LEN];
    record[0..4].copy_from_slice(&info.size.to_le_bytes());
    record[4] = info.is_directory as u8;
    let name_bytes = info.name.as_bytes();
    let n = core::cmp::min(name_bytes.len(), 255);
    record[5] = n as u8;
    record[6..6 + n].copy_from_slice(&name_bytes[..n]);
    record
}

fn resolve(app: &Application, path: &str) -> String {
    cwd::resolve_path(path, &app.working_directory())
}

pub fn get_node_info(app: &Application, path: &str, out_ptr: usize) -> Status {
    let resolved = resolve(app, path);
    match fs::vfs().find_node(&resolved) {
        Ok(info) => {
            let record = encode_node_info(&info);
            match write_user_bytes(out_ptr, &record) {
                Ok(()) => Status::Okay,
                Err(s) => s,
            }
        }
        Err(e) => e.into(),
    }
}

pub fn create(app: &Application, path: &str, is_directory: bool) -> Status {
    let resolved = resolve(app, path);
    match fs::vfs().create(&resolved, is_directory) {
        Ok(()) => Status::Okay,
        Err(e) => e.into(),
    }
}

pub fn delete(app: &Application, path: &str) -> Status {
    let resolved = resolve(app, path);
    match fs::vfs().delete_node(&resolved) {
        Ok(()) => Status::Okay,
        Err(e) => e.into(),
    }
}

pub fn open(app: &Application, path: &str, mode: OpenMode) -> Status {
    let resolved = resolve(app, path);
    match fs::vfs().open(&resolved, mode) {
        Ok(OpenedNode::File(file)) => Status::Value(app.insert_node(file) as i64),
        Ok(OpenedNode::Directory(_)) => Status::NodeIsDirectory,
        Err(e) => e.into(),
    }
}

pub fn close(app: &Application, handle: u32) -> Status {
    match app.close_node(handle) {
        Some(file) => match file.flush() {
            Ok(()) => Status::Okay,
            Err(e) => e.into(),
        },
        None => Status::UnknownId,
    }
}

pub fn read(app: &Application, handle: u32, buf_ptr: usize, len: usize) -> Status {
    if !crate::mm::user_validation::validate_user_range(buf_ptr, len) {
        return Status::BadArg;
    }
    let Some(file) = app.node(handle) else {
        return Status::UnknownId;
    };
    let mut buf = alloc::vec![0u8; len];
    match file.read(&mut buf) {
        Ok(n) => match write_user_bytes(buf_ptr, &buf[..n]) {
            Ok(()) => Status::Value(n as i64),
            Err(s) => s,
        },
        Err(e) => e.into(),
    }
}

pub fn write(app: &Application, handle: u32, data: &[u8]) -> Status {
    let Some(file) = app.node(handle) else {
        return Status::UnknownId;
    };
    match file.write(data) {
        Ok(n) => Status::Value(n as i64),
        Err(e) => e.into(),
    }
}

pub fn seek(app: &Application, handle: u32, offset: u64) -> Status {
    match app.node(handle) {
        Some(file) => {
            file.seek(offset);
            Status::Okay
        }
        None => Status::UnknownId,
    }
}

pub fn directory_stream_open(app: &Application, path: &str) -> Status {
    let resolved = resolve(app, path);
    match fs::vfs().open_directory_stream(&resolved, IterMode::ListDirectory) {
        Ok(stream) => Status::Value(app.insert_dir_stream(stream) as i64),
        Err(e) => e.into(),
    }
}

pub fn directory_stream_next(app: &Application, handle: u32, out_ptr: usize) -> Status {
    match app.with_dir_stream(handle, |stream| stream.next()) {
        Some(Ok(info)) => {
            let record = encode_node_info(&info);
            match write_user_bytes(out_ptr, &record) {
                Ok(()) => Status::Okay,
                Err(s) => s,
            }
        }
        Some(Err(e)) => e.into(),
        None => Status::UnknownId,
    }
}

pub fn directory_stream_close(app: &Application, handle: u32) -> Status {
    match app.close_dir_stream(handle) {
        Some(_) => Status::Okay,
        None => Status::UnknownId,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_info_record_encodes_name_and_size() {
        let info = NodeInfo {
            name: String::from("hello.txt"),
            is_directory: false,
            size: 6,
        };
        let record = encode_node_info(&info);
        assert_eq!(u32::from_le_bytes(record[0..4].try_into().unwrap()), 6);
        assert_eq!(record[4], 0);
        assert_eq!(record[5], 9);
        assert_eq!(&record[6..15], b"hello.txt");
    }
}
