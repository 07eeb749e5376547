// 服务层

pub mod storage;
