use crate::domain::model::Expr;
use crate::domain::reference::LogicalRef;
use crate::utils::error::Result;
use async_trait::async_trait;

/// cloud assembly 的寫入位置
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
    /// 檔案不存在時視為成功
    async fn remove_file(&self, path: &str) -> Result<()>;
    fn location(&self) -> String;
}

/// 可被其他資源參照的已宣告資源
pub trait Construct {
    fn logical_ref(&self) -> &LogicalRef;

    fn logical_id(&self) -> &str {
        &self.logical_ref().logical_id
    }

    fn reference(&self) -> Expr {
        Expr::Ref(self.logical_ref().clone())
    }

    fn attribute(&self, name: &str) -> Expr {
        Expr::GetAtt(self.logical_ref().clone(), name.to_string())
    }
}
