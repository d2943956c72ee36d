#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use spark_tls_wire::{HandshakeStream, RecordStream, decode_handshake, decode_record};

/// Fuzz 输入：一段任意字节及其分片方式。
///
/// - **Why**：回放时字节按套接字读写的粒度分段到达，解码器必须对任意切分给出与整体解码一致的结果，
///   并且对任意输入都不 panic。
/// - **How**：`chunks` 中的每个值决定下一片的长度（0 视为 1），剩余字节作为最后一片。
/// - **What**：整体解码与分片解码得到的成功记录序列必须相同。
#[derive(Debug, Arbitrary)]
struct WireCase {
    data: Vec<u8>,
    chunks: Vec<u8>,
}

fn decode_whole(data: &Bytes) -> Vec<spark_tls_wire::Record> {
    let mut buf = data.clone();
    let mut records = Vec::new();
    while let Ok(record) = decode_record(&mut buf) {
        records.push(record);
    }
    records
}

fuzz_target!(|case: WireCase| {
    let data = Bytes::from(case.data);

    let mut raw = data.clone();
    let _ = decode_handshake(&mut raw);

    let whole = decode_whole(&data);

    let mut stream = RecordStream::new();
    let mut handshakes = HandshakeStream::new();
    let mut chunked = Vec::new();
    let mut offset = 0;
    for size in case.chunks {
        if offset >= data.len() {
            break;
        }
        let end = (offset + usize::from(size.max(1))).min(data.len());
        stream.push(data.slice(offset..end));
        offset = end;
        for record in stream.by_ref() {
            match record {
                Ok(record) => chunked.push(record),
                Err(_) => break,
            }
        }
    }
    if offset < data.len() {
        stream.push(data.slice(offset..));
        for record in stream.by_ref() {
            match record {
                Ok(record) => chunked.push(record),
                Err(_) => break,
            }
        }
    }

    // 首个错误会清空拼接器，之后的字节不再与整体解码对齐，只比较错误之前的前缀。
    let common = whole.len().min(chunked.len());
    assert_eq!(&whole[..common], &chunked[..common]);

    for record in &chunked {
        handshakes.push(record.payload().clone());
        for message in handshakes.by_ref() {
            if message.is_err() {
                break;
            }
        }
    }
});
