//! 单槽邮箱 (最新值覆盖)
//!
//! 生产者随时覆盖, 消费者先 `take` 再上传, 成功后 `clear_if` 只清除自己上传的那一份.
//! 上传期间被写入的新值不会因此丢失. 只有从未被取走就被覆盖的值才计为丢弃.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// 邮箱中的一封信 (带序号)
#[derive(Clone, Debug, PartialEq)]
pub struct Letter<T> {
    pub seq: u64,
    pub item: T,
}

struct Slot<T> {
    letter: Option<Letter<T>>,
    /// 正在上传的序号
    taken: Option<u64>,
}

pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    next_seq: AtomicU64,
    overwritten: AtomicU64,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                letter: None,
                taken: None,
            }),
            next_seq: AtomicU64::new(1),
            overwritten: AtomicU64::new(0),
        }
    }
}

impl<T: Clone> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入, 覆盖旧值. 返回新序号
    pub fn post(&self, item: T) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.slot.lock();
        if let Some(old) = &slot.letter {
            if slot.taken != Some(old.seq) {
                self.overwritten.fetch_add(1, Ordering::Relaxed);
            }
        }
        slot.letter = Some(Letter { seq, item });
        seq
    }

    /// 查看当前值 (不取走)
    pub fn peek(&self) -> Option<Letter<T>> {
        self.slot.lock().letter.clone()
    }

    /// 取出当前值准备上传, 值仍留在槽中直到 `clear_if`
    pub fn take(&self) -> Option<Letter<T>> {
        let mut slot = self.slot.lock();
        let letter = slot.letter.clone()?;
        slot.taken = Some(letter.seq);
        Some(letter)
    }

    /// 上传失败: 归还, 之后被覆盖会计为丢弃
    pub fn release(&self, seq: u64) {
        let mut slot = self.slot.lock();
        if slot.taken == Some(seq) {
            slot.taken = None;
        }
    }

    /// 仅当槽中仍是 `seq` 时清空
    pub fn clear_if(&self, seq: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.taken == Some(seq) {
            slot.taken = None;
        }
        if slot.letter.as_ref().is_some_and(|l| l.seq == seq) {
            slot.letter = None;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().letter.is_some()
    }

    /// 未被取走就被覆盖的次数
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_value_wins() {
        let mb = Mailbox::new();
        mb.post(1);
        mb.post(2);
        mb.post(3);
        assert_eq!(mb.peek().unwrap().item, 3);
        assert_eq!(mb.overwritten(), 2);
    }

    #[test]
    fn test_clear_if_keeps_newer_value() {
        let mb = Mailbox::new();
        let seq = mb.post("a");
        let letter = mb.take().unwrap();
        assert_eq!(letter.seq, seq);

        // 上传期间有新值写入
        mb.post("b");
        assert!(!mb.clear_if(letter.seq));
        assert_eq!(mb.peek().unwrap().item, "b");

        let newer = mb.take().unwrap();
        assert!(mb.clear_if(newer.seq));
        assert!(!mb.is_pending());
    }

    #[test]
    fn test_replacing_taken_letter_is_not_a_drop() {
        let mb = Mailbox::new();
        mb.post(1);
        let first = mb.take().unwrap();

        // 1 正在上传, 被 2 替换不算丢弃; 2 未被取走就被 3 替换才算
        mb.post(2);
        assert_eq!(mb.overwritten(), 0);
        mb.post(3);
        assert_eq!(mb.overwritten(), 1);
        assert!(!mb.clear_if(first.seq));
    }

    #[test]
    fn test_released_letter_counts_when_replaced() {
        let mb = Mailbox::new();
        mb.post(1);
        let letter = mb.take().unwrap();
        mb.release(letter.seq);
        mb.post(2);
        assert_eq!(mb.overwritten(), 1);
    }
}
