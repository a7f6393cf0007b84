slotmap::new_key_type! {
    /// [`crate::resource_pool::ResourcePool`] 中资源的句柄
    ///
    /// 带有代际信息：资源被回收之后，旧句柄无法再解析到任何资源。
    pub struct ResourceHandle;
}
