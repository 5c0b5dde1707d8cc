//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 单向 FIFO 链表实现
//!
//! 节点不持有指针，而是保存在外部的节点池（arena）中，链表只记录
//! 节点句柄。这样节点的所有权始终属于节点池，链表之间转移的只是句柄。
//!
//! 用途：
//! - 应用和驱动之间传递 SpaceWire 包（`PktList`）
//! - 描述符环回收时临时收集已完成的包
//!
//! 设计特点：
//! - 追加、摘头、整段拼接、从头部切下一段都是 O(1)
//! - 所有操作都不分配内存，只修改 `next` 链接和 head/tail
//! - `head.is_none() == tail.is_none()` 恒成立

/// 节点池接口
///
/// 节点池负责保存每个节点的 `next` 链接。
pub trait LinkArena {
    /// 节点句柄
    type Id: Copy + Eq;

    /// 读取节点的下一个节点
    fn next(&self, id: Self::Id) -> Option<Self::Id>;

    /// 设置节点的下一个节点
    fn set_next(&mut self, id: Self::Id, next: Option<Self::Id>);
}

/// FIFO 链表头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct List<I> {
    head: Option<I>,
    tail: Option<I>,
}

impl<I: Copy + Eq> Default for List<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Copy + Eq> List<I> {
    /// 创建空链表
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    /// 由已知的首尾节点构造链表
    ///
    /// 调用者保证 `tail` 可以从 `head` 沿 `next` 到达。
    pub fn from_range(head: I, tail: I) -> Self {
        Self {
            head: Some(head),
            tail: Some(tail),
        }
    }

    /// 清空链表（不触碰节点本身）
    pub fn clear(&mut self) {
        self.head = None;
        self.tail = None;
    }

    /// 检查链表是否为空
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// 第一个节点
    pub fn head(&self) -> Option<I> {
        self.head
    }

    /// 最后一个节点
    pub fn tail(&self) -> Option<I> {
        self.tail
    }

    /// 在尾部追加一个节点
    pub fn append<A>(&mut self, arena: &mut A, id: I)
    where
        A: LinkArena<Id = I>,
    {
        arena.set_next(id, None);
        match self.tail {
            None => self.head = Some(id),
            Some(tail) => arena.set_next(tail, Some(id)),
        }
        self.tail = Some(id);
    }

    /// 把 `alist` 的全部节点拼接到当前链表尾部
    ///
    /// - `alist` 本身不会被清空，调用者不能再把它当作独立链表使用
    /// - `alist` 为空时什么也不做
    pub fn append_list<A>(&mut self, arena: &mut A, alist: &List<I>)
    where
        A: LinkArena<Id = I>,
    {
        let (Some(ahead), Some(atail)) = (alist.head, alist.tail) else {
            return;
        };

        arena.set_next(atail, None);
        match self.tail {
            None => self.head = Some(ahead),
            Some(tail) => arena.set_next(tail, Some(ahead)),
        }
        self.tail = Some(atail);
    }

    /// 从头部移除 `dlist` 描述的一段节点
    ///
    /// 两个链表从头部开始共享节点，直到 `dlist.tail`。
    /// `dlist` 为空时什么也不做。
    pub fn remove_head_list<A>(&mut self, arena: &mut A, dlist: &List<I>)
    where
        A: LinkArena<Id = I>,
    {
        let Some(dtail) = dlist.tail else {
            return;
        };

        self.head = arena.next(dtail);
        if self.head.is_none() {
            self.tail = None;
        }
        arena.set_next(dtail, None);
    }

    /// 移除并返回第一个节点
    pub fn remove_head<A>(&mut self, arena: &mut A) -> Option<I>
    where
        A: LinkArena<Id = I>,
    {
        let head = self.head?;
        self.head = arena.next(head);
        if self.head.is_none() {
            self.tail = None;
        }
        arena.set_next(head, None);
        Some(head)
    }

    /// 按顺序遍历节点句柄
    pub fn iter<'a, A>(&self, arena: &'a A) -> Iter<'a, A>
    where
        A: LinkArena<Id = I>,
    {
        Iter {
            arena,
            cur: self.head,
            tail: self.tail,
        }
    }

    /// 节点数量（O(n)）
    pub fn len<A>(&self, arena: &A) -> usize
    where
        A: LinkArena<Id = I>,
    {
        self.iter(arena).count()
    }
}

/// 链表迭代器
pub struct Iter<'a, A: LinkArena> {
    arena: &'a A,
    cur: Option<A::Id>,
    tail: Option<A::Id>,
}

impl<'a, A: LinkArena> Iterator for Iter<'a, A> {
    type Item = A::Id;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        // 到达尾节点后停止，不依赖尾节点的 next 是否已清空
        self.cur = if Some(cur) == self.tail {
            None
        } else {
            self.arena.next(cur)
        };
        Some(cur)
    }
}
