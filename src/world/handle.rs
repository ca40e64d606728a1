use std::fmt;

/// 带代数的句柄
///
/// 槽位被释放后代数递增，旧句柄即使槽位被复用也不会再次生效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// 句柄表（arena + 空闲链）
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.insert_with(|_| value)
    }

    /// 插入时可以拿到即将分配的句柄
    pub fn insert_with(&mut self, make: impl FnOnce(Handle) -> T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let handle = Handle {
                index,
                generation: slot.generation,
            };
            slot.value = Some(make(handle));
            return handle;
        }

        let handle = Handle {
            index: self.slots.len() as u32,
            generation: 0,
        };
        self.slots.push(Slot {
            generation: 0,
            value: Some(make(handle)),
        });
        handle
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// 清空所有值，已发出的句柄全部失效
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.len = 0;
    }
}

/// 为句柄定义强类型 id
macro_rules! define_handle_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) $crate::world::Handle);

        impl $name {
            pub fn handle(&self) -> $crate::world::Handle {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

pub(crate) use define_handle_id;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_stays_invalid_after_reuse() {
        let mut table = HandleTable::new();
        let first = table.insert("a");
        assert_eq!(table.remove(first), Some("a"));

        let second = table.insert("b");
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert!(table.get(first).is_none());
        assert_eq!(table.get(second), Some(&"b"));
        assert!(table.remove(first).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn clear_invalidates_every_handle() {
        let mut table = HandleTable::new();
        let a = table.insert(1);
        let b = table.insert(2);
        table.clear();
        assert!(table.is_empty());
        assert!(!table.contains(a));
        assert!(!table.contains(b));

        let c = table.insert(3);
        assert!(table.contains(c));
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn insert_with_sees_own_handle() {
        let mut table = HandleTable::new();
        let handle = table.insert_with(|handle| handle.index());
        assert_eq!(table.get(handle), Some(&handle.index()));
    }
}
