//! Bucket codec and overflow chains.
//!
//! A bucket holds the records one leaf pointer refers to. Its head page is
//! tagged with the bucket flavour; continuation pages are tagged `Overflow`.
//!
//! ```text
//! +---------------------+ 0
//! | NodeType: i32       |
//! | Nentries: i32       |  records on this page
//! | Overflow: i64       |  next page of the chain, 0 at the end
//! +---------------------+ 16 (BUCKET_PREAMBLE)
//! | keylen: i32 * n     |  string-keyed flavours only
//! +---------------------+
//! | records             |
//! +---------------------+
//! ```

use super::node::{NodeKey, get_len, need};
use crate::cache::PageCache;
use bindex_common::page::{BUCKET_PREAMBLE, KEYLEN_ENTRY, NodeType, PageNo};
use bindex_common::{BindexError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt::Debug;

/// A record stored in bucket pages.
pub trait BucketRecord: Clone + Debug {
    /// Ordering key of the record.
    type Key: NodeKey;

    /// Tag of the head page.
    const HEAD_TYPE: NodeType;

    /// True if each page carries a key length table.
    const KEYED: bool;

    /// Flavour name for diagnostics.
    const NAME: &'static str;

    /// Returns the ordering key.
    fn key(&self) -> &Self::Key;

    /// Bytes of the record body, excluding its length table entry.
    fn body_len(&self) -> usize;

    /// Appends the record body.
    fn encode_body(&self, buf: &mut BytesMut);

    /// Reads a record body. `keylen` comes from the length table.
    fn decode_body(buf: &mut &[u8], keylen: usize, pageno: PageNo) -> Result<Self>;

    /// Bytes the record adds to a bucket page.
    fn page_len(&self) -> usize {
        self.body_len() + if Self::KEYED { KEYLEN_ENTRY } else { 0 }
    }

    /// Length table entry for string-keyed flavours.
    fn keylen(&self) -> usize {
        0
    }
}

fn get_string(buf: &mut &[u8], len: usize, pageno: PageNo) -> Result<String> {
    need(buf, len, pageno, "record key")?;
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    String::from_utf8(bytes).map_err(|_| BindexError::PageCorrupted {
        pageno: pageno.get(),
        reason: "record key is not valid UTF-8".to_string(),
    })
}

/// ID bucket record: one identifier and its posting.
///
/// When `dups > 0` the postings live in a numeric tree rooted at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdEntry {
    pub id: String,
    pub dbno: u32,
    pub dups: u32,
    pub offset: u64,
    pub refoffset: u64,
}

impl BucketRecord for IdEntry {
    type Key = String;
    const HEAD_TYPE: NodeType = NodeType::Bucket;
    const KEYED: bool = true;
    const NAME: &'static str = "id bucket";

    fn key(&self) -> &String {
        &self.id
    }

    fn body_len(&self) -> usize {
        self.id.len() + 4 + 4 + 8 + 8
    }

    fn keylen(&self) -> usize {
        self.id.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_slice(self.id.as_bytes());
        buf.put_i32_le(self.dbno as i32);
        buf.put_i32_le(self.dups as i32);
        buf.put_i64_le(self.offset as i64);
        buf.put_i64_le(self.refoffset as i64);
    }

    fn decode_body(buf: &mut &[u8], keylen: usize, pageno: PageNo) -> Result<Self> {
        let id = get_string(buf, keylen, pageno)?;
        need(buf, 24, pageno, "id record")?;
        Ok(Self {
            id,
            dbno: buf.get_i32_le() as u32,
            dups: buf.get_i32_le() as u32,
            offset: buf.get_i64_le() as u64,
            refoffset: buf.get_i64_le() as u64,
        })
    }
}

/// Numeric bucket record: one posting of a duplicated identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumEntry {
    pub offset: u64,
    pub refoffset: u64,
    pub dbno: u32,
}

impl BucketRecord for NumEntry {
    type Key = u64;
    const HEAD_TYPE: NodeType = NodeType::NumBucket;
    const KEYED: bool = false;
    const NAME: &'static str = "numeric bucket";

    fn key(&self) -> &u64 {
        &self.offset
    }

    fn body_len(&self) -> usize {
        8 + 8 + 4
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i64_le(self.offset as i64);
        buf.put_i64_le(self.refoffset as i64);
        buf.put_i32_le(self.dbno as i32);
    }

    fn decode_body(buf: &mut &[u8], _keylen: usize, pageno: PageNo) -> Result<Self> {
        need(buf, 20, pageno, "numeric record")?;
        Ok(Self {
            offset: buf.get_i64_le() as u64,
            refoffset: buf.get_i64_le() as u64,
            dbno: buf.get_i32_le() as u32,
        })
    }
}

/// Primary keyword record: a keyword and the root of its secondary tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriEntry {
    pub keyword: String,
    pub treeblock: PageNo,
}

impl BucketRecord for PriEntry {
    type Key = String;
    const HEAD_TYPE: NodeType = NodeType::PriBucket;
    const KEYED: bool = true;
    const NAME: &'static str = "primary bucket";

    fn key(&self) -> &String {
        &self.keyword
    }

    fn body_len(&self) -> usize {
        self.keyword.len() + 8
    }

    fn keylen(&self) -> usize {
        self.keyword.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_slice(self.keyword.as_bytes());
        buf.put_i64_le(self.treeblock.get() as i64);
    }

    fn decode_body(buf: &mut &[u8], keylen: usize, pageno: PageNo) -> Result<Self> {
        let keyword = get_string(buf, keylen, pageno)?;
        need(buf, 8, pageno, "primary record")?;
        Ok(Self {
            keyword,
            treeblock: PageNo(buf.get_i64_le() as u64),
        })
    }
}

/// Secondary keyword record: one member identifier of a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecEntry {
    pub id: String,
    pub dups: u32,
}

impl BucketRecord for SecEntry {
    type Key = String;
    const HEAD_TYPE: NodeType = NodeType::SecBucket;
    const KEYED: bool = true;
    const NAME: &'static str = "secondary bucket";

    fn key(&self) -> &String {
        &self.id
    }

    fn body_len(&self) -> usize {
        self.id.len() + 4
    }

    fn keylen(&self) -> usize {
        self.id.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_slice(self.id.as_bytes());
        buf.put_i32_le(self.dups as i32);
    }

    fn decode_body(buf: &mut &[u8], keylen: usize, pageno: PageNo) -> Result<Self> {
        let id = get_string(buf, keylen, pageno)?;
        need(buf, 4, pageno, "secondary record")?;
        Ok(Self {
            id,
            dups: buf.get_i32_le() as u32,
        })
    }
}

/// Returns how many leading `entries` fit one bucket page.
pub fn entries_per_page<R: BucketRecord>(entries: &[R], pagesize: usize) -> usize {
    let mut used = BUCKET_PREAMBLE;
    let mut count = 0;
    for entry in entries {
        used += entry.page_len();
        if used > pagesize {
            break;
        }
        count += 1;
    }
    count
}

/// Encodes one bucket page holding `entries`.
pub fn encode_page<R: BucketRecord>(
    entries: &[R],
    nodetype: NodeType,
    overflow: Option<PageNo>,
    pagesize: usize,
) -> Result<Vec<u8>> {
    let len = BUCKET_PREAMBLE + entries.iter().map(BucketRecord::page_len).sum::<usize>();
    if len > pagesize {
        return Err(BindexError::NodeFull);
    }

    let mut buf = BytesMut::with_capacity(pagesize);
    buf.put_i32_le(nodetype as i32);
    buf.put_i32_le(entries.len() as i32);
    buf.put_i64_le(PageNo::to_pointer(overflow) as i64);
    if R::KEYED {
        for entry in entries {
            buf.put_i32_le(entry.keylen() as i32);
        }
    }
    for entry in entries {
        entry.encode_body(&mut buf);
    }
    buf.resize(pagesize, 0);
    Ok(buf.to_vec())
}

/// Decodes one bucket page, checking its tag against `expected`.
///
/// Returns the records and the next page of the chain.
pub fn decode_page<R: BucketRecord>(
    page: &[u8],
    pageno: PageNo,
    expected: NodeType,
) -> Result<(Vec<R>, Option<PageNo>)> {
    let mut buf = page;
    need(buf, BUCKET_PREAMBLE, pageno, "bucket preamble")?;

    let raw_type = buf.get_i32_le();
    if raw_type != expected as i32 {
        return Err(BindexError::UnexpectedNodeType {
            pageno: pageno.get(),
            expected: R::NAME,
            found: raw_type,
        });
    }
    let nentries = get_len(&mut buf, pageno, "entry count")?;
    let overflow = PageNo::from_pointer(buf.get_i64_le() as u64);
    if nentries > page.len() / 4 {
        return Err(BindexError::PageCorrupted {
            pageno: pageno.get(),
            reason: format!("impossible entry count {nentries}"),
        });
    }

    let keylens = if R::KEYED {
        need(buf, nentries * KEYLEN_ENTRY, pageno, "bucket key length table")?;
        (0..nentries)
            .map(|_| get_len(&mut buf, pageno, "record key length"))
            .collect::<Result<Vec<_>>>()?
    } else {
        vec![0; nentries]
    };

    let entries = keylens
        .into_iter()
        .map(|keylen| R::decode_body(&mut buf, keylen, pageno))
        .collect::<Result<Vec<_>>>()?;

    Ok((entries, overflow))
}

/// Returns the pages of the chain starting at `head`.
pub fn chain_pages<R: BucketRecord>(cache: &mut PageCache, head: PageNo) -> Result<Vec<PageNo>> {
    let mut pages = Vec::new();
    let mut next = Some(head);
    while let Some(pageno) = next {
        check_chain_length(cache, pages.len(), head)?;
        let expected = if pages.is_empty() { R::HEAD_TYPE } else { NodeType::Overflow };
        let page = cache.fetch(pageno)?;
        let (_, overflow) = decode_page::<R>(page, pageno, expected)?;
        pages.push(pageno);
        next = overflow;
    }
    Ok(pages)
}

/// Reads every record of the bucket starting at `head`.
pub fn read_bucket<R: BucketRecord>(cache: &mut PageCache, head: PageNo) -> Result<Vec<R>> {
    let mut entries = Vec::new();
    let mut next = Some(head);
    let mut pages = 0;
    while let Some(pageno) = next {
        check_chain_length(cache, pages, head)?;
        let expected = if pages == 0 { R::HEAD_TYPE } else { NodeType::Overflow };
        let page = cache.fetch(pageno)?;
        let (mut chunk, overflow) = decode_page::<R>(page, pageno, expected)?;
        entries.append(&mut chunk);
        pages += 1;
        next = overflow;
    }
    Ok(entries)
}

fn check_chain_length(cache: &PageCache, pages: usize, head: PageNo) -> Result<()> {
    if pages as u64 > cache.page_count() {
        return Err(BindexError::BTreeCorrupted(format!(
            "overflow chain from {head} does not terminate"
        )));
    }
    Ok(())
}

/// Writes `entries` as the bucket starting at `head`.
///
/// Pages of the existing chain are reused in order. New overflow pages are
/// allocated when the records outgrow it; surplus pages are unlinked.
pub fn write_bucket<R: BucketRecord>(
    cache: &mut PageCache,
    head: PageNo,
    entries: &[R],
    existing: bool,
) -> Result<()> {
    let pagesize = cache.pagesize();
    let mut chain = if existing {
        chain_pages::<R>(cache, head)?
    } else {
        vec![head]
    };

    let mut rest = entries;
    let mut index = 0;
    loop {
        let count = entries_per_page(rest, pagesize);
        if count == 0 && !rest.is_empty() {
            return Err(BindexError::KeyTooLarge {
                size: rest[0].page_len(),
                max: pagesize - BUCKET_PREAMBLE,
            });
        }
        let (here, remaining) = rest.split_at(count);

        let next = if remaining.is_empty() {
            None
        } else {
            if index + 1 >= chain.len() {
                let page = cache.allocate()?;
                tracing::debug!(%head, overflow = %page, bucket = R::NAME, "chained overflow page");
                chain.push(page);
            }
            Some(chain[index + 1])
        };

        let nodetype = if index == 0 { R::HEAD_TYPE } else { NodeType::Overflow };
        let page = encode_page(here, nodetype, next, pagesize)?;
        cache.write_page(chain[index], &page)?;

        if next.is_none() {
            return Ok(());
        }
        rest = remaining;
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::PageStore;
    use tempfile::tempdir;

    const PAGE: usize = 128;

    fn id(name: &str, offset: u64) -> IdEntry {
        IdEntry {
            id: name.to_string(),
            dbno: 1,
            dups: 0,
            offset,
            refoffset: offset + 7,
        }
    }

    fn create_test_cache() -> (PageCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = PageStore::create(dir.path().join("t.xid")).unwrap();
        (PageCache::new(store, PAGE, 8).unwrap(), dir)
    }

    #[test]
    fn test_id_bucket_page_layout() {
        let entries = vec![id("AB", 10), id("CDE", 20)];
        let page = encode_page(&entries, NodeType::Bucket, None, PAGE).unwrap();

        assert_eq!(&page[0..4], &4i32.to_le_bytes());
        assert_eq!(&page[4..8], &2i32.to_le_bytes());
        assert_eq!(&page[8..16], &0i64.to_le_bytes());
        assert_eq!(&page[16..20], &2i32.to_le_bytes());
        assert_eq!(&page[20..24], &3i32.to_le_bytes());
        assert_eq!(&page[24..26], b"AB");
        // dbno follows the key
        assert_eq!(&page[26..30], &1i32.to_le_bytes());

        let (decoded, overflow) = decode_page::<IdEntry>(&page, PageNo(0), NodeType::Bucket).unwrap();
        assert_eq!(decoded, entries);
        assert_eq!(overflow, None);
    }

    #[test]
    fn test_numeric_bucket_roundtrip() {
        let entries = vec![
            NumEntry { offset: 5, refoffset: 6, dbno: 7 },
            NumEntry { offset: 900, refoffset: 0, dbno: 2 },
        ];
        let page = encode_page(&entries, NodeType::NumBucket, Some(PageNo(256)), PAGE).unwrap();
        // No length table
        assert_eq!(&page[16..24], &5i64.to_le_bytes());

        let (decoded, overflow) =
            decode_page::<NumEntry>(&page, PageNo(128), NodeType::NumBucket).unwrap();
        assert_eq!(decoded, entries);
        assert_eq!(overflow, Some(PageNo(256)));
    }

    #[test]
    fn test_keyword_buckets_roundtrip() {
        let pri = vec![PriEntry {
            keyword: "KINASE".to_string(),
            treeblock: PageNo(1024),
        }];
        let page = encode_page(&pri, NodeType::PriBucket, None, PAGE).unwrap();
        let (decoded, _) = decode_page::<PriEntry>(&page, PageNo(0), NodeType::PriBucket).unwrap();
        assert_eq!(decoded, pri);

        let sec = vec![
            SecEntry { id: "P12345".to_string(), dups: 0 },
            SecEntry { id: "Q99999".to_string(), dups: 3 },
        ];
        let page = encode_page(&sec, NodeType::SecBucket, None, PAGE).unwrap();
        let (decoded, _) = decode_page::<SecEntry>(&page, PageNo(0), NodeType::SecBucket).unwrap();
        assert_eq!(decoded, sec);
    }

    #[test]
    fn test_decode_rejects_wrong_flavour() {
        let page = encode_page(&[id("A", 1)], NodeType::Bucket, None, PAGE).unwrap();
        let err = decode_page::<SecEntry>(&page, PageNo(384), NodeType::SecBucket).unwrap_err();
        assert!(matches!(
            err,
            BindexError::UnexpectedNodeType { pageno: 384, found: 4, .. }
        ));
    }

    #[test]
    fn test_encode_page_overfull() {
        let entries: Vec<_> = (0..10).map(|i| id(&format!("KEY{i}"), i)).collect();
        assert!(matches!(
            encode_page(&entries, NodeType::Bucket, None, PAGE),
            Err(BindexError::NodeFull)
        ));
    }

    #[test]
    fn test_entries_per_page() {
        // 16 + 3 * (4 + 2 + 24) = 106 fits, a fourth does not
        let entries: Vec<_> = (0..5).map(|i| id(&format!("K{i}"), i)).collect();
        assert_eq!(entries_per_page(&entries, PAGE), 3);
        assert_eq!(entries_per_page::<IdEntry>(&[], PAGE), 0);
    }

    #[test]
    fn test_write_bucket_chains_overflow_pages() {
        let (mut cache, _dir) = create_test_cache();
        let head = cache.allocate().unwrap();

        let entries: Vec<_> = (0..10).map(|i| id(&format!("K{i}"), i * 100)).collect();
        write_bucket(&mut cache, head, &entries, false).unwrap();

        let chain = chain_pages::<IdEntry>(&mut cache, head).unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0], head);
        assert_eq!(read_bucket::<IdEntry>(&mut cache, head).unwrap(), entries);

        // Continuation pages carry the overflow tag
        let page = cache.fetch(chain[1]).unwrap();
        assert_eq!(&page[0..4], &(NodeType::Overflow as i32).to_le_bytes());
    }

    #[test]
    fn test_write_bucket_reuses_and_unlinks_chain() {
        let (mut cache, _dir) = create_test_cache();
        let head = cache.allocate().unwrap();

        let many: Vec<_> = (0..10).map(|i| id(&format!("K{i}"), i)).collect();
        write_bucket(&mut cache, head, &many, false).unwrap();
        let pages_before = cache.page_count();

        // Rewriting the same amount allocates nothing new
        write_bucket(&mut cache, head, &many, true).unwrap();
        assert_eq!(cache.page_count(), pages_before);

        let few = vec![id("K0", 0)];
        write_bucket(&mut cache, head, &few, true).unwrap();
        assert_eq!(chain_pages::<IdEntry>(&mut cache, head).unwrap(), vec![head]);
        assert_eq!(read_bucket::<IdEntry>(&mut cache, head).unwrap(), few);
    }

    #[test]
    fn test_write_empty_bucket() {
        let (mut cache, _dir) = create_test_cache();
        let head = cache.allocate().unwrap();
        write_bucket::<SecEntry>(&mut cache, head, &[], false).unwrap();
        assert!(read_bucket::<SecEntry>(&mut cache, head).unwrap().is_empty());
    }

    #[test]
    fn test_write_bucket_record_too_large() {
        let (mut cache, _dir) = create_test_cache();
        let head = cache.allocate().unwrap();
        let huge = vec![id(&"X".repeat(PAGE), 1)];
        assert!(matches!(
            write_bucket(&mut cache, head, &huge, false),
            Err(BindexError::KeyTooLarge { .. })
        ));
    }

    #[test]
    fn test_read_bucket_detects_cycle() {
        let (mut cache, _dir) = create_test_cache();
        let head = cache.allocate().unwrap();
        let other = cache.allocate().unwrap();

        let a = encode_page(&[id("A", 1)], NodeType::Bucket, Some(other), PAGE).unwrap();
        let b = encode_page(&[id("B", 2)], NodeType::Overflow, Some(other), PAGE).unwrap();
        cache.write_page(head, &a).unwrap();
        cache.write_page(other, &b).unwrap();

        assert!(matches!(
            read_bucket::<IdEntry>(&mut cache, head),
            Err(BindexError::BTreeCorrupted(_))
        ));
    }
}
