//! Entities shared by the integration tests.
//!
//! Team 1:N Member (Member owns `team_id`), Member N:N Product through
//! `member_product`, MemberProduct with a composite (member, product) key,
//! Order with a generated key, Member 1:1 Locker (Member owns `locker_id`).

#![allow(dead_code)]

use persistctx::prelude::*;

// ============================================================================
// Team
// ============================================================================

#[derive(Debug)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub members: ToMany<Member>,
}

impl Team {
    pub fn members(&mut self) -> &mut ToMany<Member> {
        &mut self.members
    }
}

impl Entity for Team {
    const NAME: &'static str = "Team";

    fn entity_type() -> EntityType {
        EntityType::new(Self::NAME)
            .id("team_id")
            .column("name")
            .relationship(RelationshipInfo::one_to_many("members", "Member").mapped_by("team"))
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::from(self.id.as_str())
    }

    fn to_row(&self) -> Row {
        Row::new().with("team_id", &self.id).with("name", &self.name)
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("team_id")?,
            name: row.get_as("name")?,
            members: ToMany::unloaded(),
        })
    }
}

pub fn team(id: &str, name: &str) -> EntityRef<Team> {
    EntityRef::new(Team {
        id: id.to_string(),
        name: name.to_string(),
        members: ToMany::new(),
    })
}

// ============================================================================
// Member
// ============================================================================

#[derive(Debug)]
pub struct Member {
    pub id: String,
    pub username: String,
    pub age: i32,
    pub team: ToOne<Team>,
    pub locker: ToOne<Locker>,
    pub products: ToMany<Product>,
    pub member_products: ToMany<MemberProduct>,
    pub orders: ToMany<Order>,
}

impl Member {
    pub fn team(&mut self) -> &mut ToOne<Team> {
        &mut self.team
    }

    pub fn locker(&mut self) -> &mut ToOne<Locker> {
        &mut self.locker
    }

    pub fn products(&mut self) -> &mut ToMany<Product> {
        &mut self.products
    }

    pub fn member_products(&mut self) -> &mut ToMany<MemberProduct> {
        &mut self.member_products
    }

    pub fn orders(&mut self) -> &mut ToMany<Order> {
        &mut self.orders
    }
}

impl Entity for Member {
    const NAME: &'static str = "Member";

    fn entity_type() -> EntityType {
        EntityType::new(Self::NAME)
            .id("member_id")
            .column("username")
            .column("age")
            .relationship(RelationshipInfo::many_to_one("team", "Team").join_column("team_id"))
            .relationship(RelationshipInfo::one_to_one("locker", "Locker").join_column("locker_id"))
            .relationship(
                RelationshipInfo::many_to_many("products", "Product").link_table(
                    LinkTableInfo::new("member_product_link", "member_id", "product_id"),
                ),
            )
            .relationship(
                RelationshipInfo::one_to_many("member_products", "MemberProduct")
                    .mapped_by("member"),
            )
            .relationship(RelationshipInfo::one_to_many("orders", "Order").mapped_by("member"))
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::from(self.id.as_str())
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("member_id", &self.id)
            .with("username", &self.username)
            .with("age", self.age)
            .with("team_id", self.team.fk_value())
            .with("locker_id", self.locker.fk_value())
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("member_id")?,
            username: row.get_as("username")?,
            age: row.get_as("age")?,
            team: ToOne::from_column(row, "team_id"),
            locker: ToOne::from_column(row, "locker_id"),
            products: ToMany::unloaded(),
            member_products: ToMany::unloaded(),
            orders: ToMany::unloaded(),
        })
    }

    fn link_keys(&self, relationship: &str) -> Vec<PrimaryKey> {
        match relationship {
            "products" => self.products.keys(),
            _ => Vec::new(),
        }
    }
}

pub fn member(id: &str, username: &str, age: i32) -> EntityRef<Member> {
    EntityRef::new(Member {
        id: id.to_string(),
        username: username.to_string(),
        age,
        team: ToOne::empty(),
        locker: ToOne::empty(),
        products: ToMany::new(),
        member_products: ToMany::new(),
        orders: ToMany::new(),
    })
}

// ============================================================================
// Product
// ============================================================================

#[derive(Debug)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub members: ToMany<Member>,
}

impl Product {
    pub fn members(&mut self) -> &mut ToMany<Member> {
        &mut self.members
    }
}

impl Entity for Product {
    const NAME: &'static str = "Product";

    fn entity_type() -> EntityType {
        EntityType::new(Self::NAME)
            .id("product_id")
            .column("name")
            .relationship(
                RelationshipInfo::many_to_many("members", "Member").mapped_by("products"),
            )
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::from(self.id.as_str())
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("product_id", &self.id)
            .with("name", &self.name)
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("product_id")?,
            name: row.get_as("name")?,
            members: ToMany::unloaded(),
        })
    }
}

pub fn product(id: &str, name: &str) -> EntityRef<Product> {
    EntityRef::new(Product {
        id: id.to_string(),
        name: name.to_string(),
        members: ToMany::new(),
    })
}

// ============================================================================
// MemberProduct (composite key)
// ============================================================================

/// Identifier of a [`MemberProduct`]: both foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberProductId {
    pub member: String,
    pub product: String,
}

impl From<MemberProductId> for PrimaryKey {
    fn from(id: MemberProductId) -> Self {
        PrimaryKey::composite([Value::from(id.member), Value::from(id.product)])
    }
}

#[derive(Debug)]
pub struct MemberProduct {
    pub member: ToOne<Member>,
    pub product: ToOne<Product>,
    pub order_amount: i32,
}

impl MemberProduct {
    pub fn member(&mut self) -> &mut ToOne<Member> {
        &mut self.member
    }

    pub fn product(&mut self) -> &mut ToOne<Product> {
        &mut self.product
    }
}

impl Entity for MemberProduct {
    const NAME: &'static str = "MemberProduct";

    fn entity_type() -> EntityType {
        EntityType::new(Self::NAME)
            .id("member_id")
            .id("product_id")
            .column("order_amount")
            .relationship(RelationshipInfo::many_to_one("member", "Member").join_column("member_id"))
            .relationship(
                RelationshipInfo::many_to_one("product", "Product").join_column("product_id"),
            )
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::composite([self.member.fk_value(), self.product.fk_value()])
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("member_id", self.member.fk_value())
            .with("product_id", self.product.fk_value())
            .with("order_amount", self.order_amount)
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            member: ToOne::from_column(row, "member_id"),
            product: ToOne::from_column(row, "product_id"),
            order_amount: row.get_as("order_amount")?,
        })
    }
}

pub fn member_product(
    member: &EntityRef<Member>,
    product: &EntityRef<Product>,
    order_amount: i32,
) -> EntityRef<MemberProduct> {
    let link = EntityRef::new(MemberProduct {
        member: ToOne::empty(),
        product: ToOne::loaded(product.clone()),
        order_amount,
    });
    set_many_to_one(&link, Some(member), MemberProduct::member, Member::member_products).unwrap();
    link
}

// ============================================================================
// Order (generated key)
// ============================================================================

#[derive(Debug)]
pub struct Order {
    pub id: Option<i64>,
    pub member: ToOne<Member>,
    pub product: ToOne<Product>,
    pub order_amount: i32,
}

impl Order {
    pub fn member(&mut self) -> &mut ToOne<Member> {
        &mut self.member
    }

    pub fn product(&mut self) -> &mut ToOne<Product> {
        &mut self.product
    }
}

impl Entity for Order {
    const NAME: &'static str = "Order";

    fn entity_type() -> EntityType {
        EntityType::new(Self::NAME)
            .generated_id("order_id")
            .column("order_amount")
            .relationship(RelationshipInfo::many_to_one("member", "Member").join_column("member_id"))
            .relationship(
                RelationshipInfo::many_to_one("product", "Product").join_column("product_id"),
            )
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::single(self.id)
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("order_id", self.id)
            .with("order_amount", self.order_amount)
            .with("member_id", self.member.fk_value())
            .with("product_id", self.product.fk_value())
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("order_id")?,
            member: ToOne::from_column(row, "member_id"),
            product: ToOne::from_column(row, "product_id"),
            order_amount: row.get_as("order_amount")?,
        })
    }

    fn assign_generated_key(&mut self, id: i64) {
        self.id = Some(id);
    }
}

pub fn order(
    member: &EntityRef<Member>,
    product: &EntityRef<Product>,
    order_amount: i32,
) -> EntityRef<Order> {
    let order = EntityRef::new(Order {
        id: None,
        member: ToOne::empty(),
        product: ToOne::loaded(product.clone()),
        order_amount,
    });
    set_many_to_one(&order, Some(member), Order::member, Member::orders).unwrap();
    order
}

// ============================================================================
// Locker (one-to-one, inverse side)
// ============================================================================

#[derive(Debug)]
pub struct Locker {
    pub id: Option<i64>,
    pub name: String,
    pub member: ToOne<Member>,
}

impl Locker {
    pub fn member(&mut self) -> &mut ToOne<Member> {
        &mut self.member
    }
}

impl Entity for Locker {
    const NAME: &'static str = "Locker";

    fn entity_type() -> EntityType {
        EntityType::new(Self::NAME)
            .generated_id("locker_id")
            .column("name")
            .relationship(RelationshipInfo::one_to_one("member", "Member").mapped_by("locker"))
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::single(self.id)
    }

    fn to_row(&self) -> Row {
        Row::new().with("locker_id", self.id).with("name", &self.name)
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as("locker_id")?,
            name: row.get_as("name")?,
            member: ToOne::unresolved(),
        })
    }

    fn assign_generated_key(&mut self, id: i64) {
        self.id = Some(id);
    }
}

pub fn locker(name: &str) -> EntityRef<Locker> {
    EntityRef::new(Locker {
        id: None,
        name: name.to_string(),
        member: ToOne::empty(),
    })
}

// ============================================================================
// Factories
// ============================================================================

pub fn factory_with(db: &MemoryDatabase, config: SessionConfig) -> SessionFactory<MemoryDatabase> {
    SessionFactory::builder()
        .config(config)
        .register::<Team>()
        .register::<Member>()
        .register::<Product>()
        .register::<MemberProduct>()
        .register::<Order>()
        .register::<Locker>()
        .build(db.clone())
        .unwrap()
}

pub fn factory(db: &MemoryDatabase) -> SessionFactory<MemoryDatabase> {
    factory_with(db, SessionConfig::default())
}
