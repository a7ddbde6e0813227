//! Fixed templates behind the container synthesizer.

/// Reference-counted wrapper `$w` around a heap block `{count, payload: $T}`. `count` holds the
/// number of owners beyond the first.
pub const RC_TEMPLATE: &str = r#"
(template ((w ident) (T type) (inner fragment))
  $inner
  (struct ${w}_block
    (count i64)
    (payload $T))
  (struct $w
    (block (ptr ${w}_block)))
  (fun ${w}_new ((value $T)) $w
    (let block (cast (ptr ${w}_block) (malloc (sizeof ${w}_block))))
    (store (field block count) 0)
    (store (field block payload) value)
    (make $w block))
  (fun ${w}_deref ((rc $w)) (ptr $T)
    (field (. rc block) payload))
  (fun ${w}_duplicate ((rc $w)) $w
    (let count (field (. rc block) count))
    (store count (+ (load count) 1))
    (make $w (. rc block)))
  (fun ${w}_release ((rc $w)) unit
    (let block (. rc block))
    (let remaining (- (load (field block count)) 1))
    (if (< remaining 0)
      (free block)
      (store (field block count) remaining)))
  ; total owners, including the first
  (fun ${w}_count ((rc $w)) i64
    (+ (load (field (. rc block) count)) 1)))
"#;

/// Payload of an array block: the length followed by the first element slot.
pub const HEADER_TEMPLATE: &str = r#"
(template ((a ident) (T type))
  (struct ${a}_header
    (length u64)
    (first $T)))
"#;

/// Array operations, compiled against the rc module of `$a`.
pub const ARRAY_TEMPLATE: &str = r#"
(template ((a ident) (T type))
  (global ${a}_cached_offset i64 -1)
  ; byte distance from the block start to the first element, measured once
  (fun ${a}_data_offset () u64
    (if (< ${a}_cached_offset 0)
      (do
        (let sample (cast (ptr ${a}_block) (malloc (sizeof ${a}_block))))
        (set ${a}_cached_offset
          (- (addr (field (field sample payload) first)) (addr sample)))
        (free sample)))
    ${a}_cached_offset)
  (fun ${a}_new ((items (seq $T))) $a
    (let count (len items))
    (let data (${a}_data_offset))
    (let block (cast (ptr ${a}_block)
      (malloc (+ data (* count (sizeof $T))))))
    (store (field block count) 0)
    (store (field (field block payload) length) count)
    (seq_copy (cast (ptr $T) (offset (cast (ptr u8) block) data)) items)
    (make $a block))
  (fun ${a}_length ((array $a)) u64
    (load (field (field (. array block) payload) length)))
  ; unchecked
  (fun ${a}_index_address ((array $a) (index u64)) (ptr $T)
    (offset (field (field (. array block) payload) first) index))
  (fun ${a}_index ((array $a) (index u64)) $T
    (load (${a}_index_address array index))))
"#;
