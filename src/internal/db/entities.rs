//! sea-orm entities for the heap tables.
//!
//! Only the uncompressed index tables are modeled here. The two delta
//! tables are owned by [`super::xpatch`] and addressed with raw statements;
//! they sit below the ORM the same way the compression extension sits below
//! the SQL surface.

/// `pgit_paths`: interning table mapping repository paths to group ids.
pub mod path_row {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "pgit_paths")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub path_id: i64,
        #[sea_orm(unique)]
        pub path: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// `pgit_file_refs`: one row per (commit, path) touched.
pub mod file_ref_row {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "pgit_file_refs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub commit_id: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub path_id: i64,
        pub content_hash: Option<String>,
        pub change_kind: i16,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// `pgit_commit_graph`: navigation mirror with binary-lifting pointers.
/// `anc` holds the 2^k-th ancestor ids as a JSON array.
pub mod graph_row {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "pgit_commit_graph")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub parent_id: Option<String>,
        pub merge_parent_id: Option<String>,
        pub anc: String,
        pub subject: String,
        pub committed_at: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// `pgit_refs`: named refs; a single `HEAD` row in practice.
pub mod ref_row {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "pgit_refs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub name: String,
        pub commit_id: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// `pgit_metadata`: repository-level key/value settings.
pub mod meta_row {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "pgit_metadata")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub key: String,
        pub value: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
