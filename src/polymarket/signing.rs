//! EIP-712 Signing for Polymarket CLOB
//!
//! Order signing, the `ClobAuth` L1 signature for `/auth/*` and the L2 HMAC
//! header signature.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip712::{EIP712Domain, Eip712DomainType, TypedData, Types};
use ethers::types::{Address, U256};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;

const POLYMARKET_CTF_EXCHANGE_DOMAIN: &str = "Polymarket CTF Exchange";
const CLOB_AUTH_DOMAIN: &str = "ClobAuthDomain";
const DOMAIN_VERSION: &str = "1";
const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
const POLYGON_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
const AMOY_EXCHANGE: &str = "0xdFE02Eb6733538f8Ea35D585af8DE5958AD99E40";

/// USDC and conditional tokens both use 6 decimals
const TOKEN_SCALE: u32 = 6;

fn ctf_exchange_address(chain_id: u64) -> Result<Address> {
    let raw = match chain_id {
        137 => POLYGON_EXCHANGE,
        80002 => AMOY_EXCHANGE,
        _ => bail!("Unsupported chain_id {} for CLOB order signing", chain_id),
    };
    raw.parse().context("invalid exchange address constant")
}

pub fn parse_wallet(private_key: &str, chain_id: u64) -> Result<LocalWallet> {
    let wallet: LocalWallet = private_key
        .trim()
        .parse()
        .context("Invalid private key")?;
    Ok(wallet.with_chain_id(chain_id))
}

fn to_base_units(amount: Decimal) -> Result<U256> {
    let scaled = (amount * Decimal::from(10u64.pow(TOKEN_SCALE))).trunc();
    let units = scaled
        .to_u128()
        .with_context(|| format!("Amount {} out of range", amount))?;
    Ok(U256::from(units))
}

/// Unsigned market BUY: spend `amount_usdc` at up to `price` per share
#[derive(Debug, Clone)]
pub struct MarketBuy {
    pub token_id: String,
    pub price: Decimal,
    pub amount_usdc: Decimal,
    pub signature_type: u8,
    pub salt: u64,
    pub nonce: u64,
}

impl MarketBuy {
    pub fn new(token_id: impl Into<String>, price: Decimal, amount_usdc: Decimal, signature_type: u8) -> Self {
        Self {
            token_id: token_id.into(),
            price,
            amount_usdc,
            signature_type,
            salt: rand::random::<u64>(),
            nonce: 0,
        }
    }

    /// (makerAmount, takerAmount): USDC paid, shares received
    pub fn amounts(&self) -> Result<(U256, U256)> {
        if self.price <= Decimal::ZERO || self.price > Decimal::ONE {
            bail!("Price {} outside (0, 1]", self.price);
        }
        if self.amount_usdc <= Decimal::ZERO {
            bail!("Amount must be positive, got {}", self.amount_usdc);
        }
        let shares = self.amount_usdc / self.price;
        Ok((to_base_units(self.amount_usdc)?, to_base_units(shares)?))
    }
}

/// Order ready for `POST /order`
#[derive(Debug, Clone)]
pub struct SignedOrder {
    pub salt: u64,
    pub maker: Address,
    pub token_id: String,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub nonce: u64,
    pub signature_type: u8,
    pub signature: String,
}

impl SignedOrder {
    /// Fill-or-kill request body
    pub fn to_payload(&self, owner: &str) -> Value {
        serde_json::json!({
            "order": {
                "salt": self.salt,
                "maker": format!("{:#x}", self.maker),
                "signer": format!("{:#x}", self.maker),
                "taker": ZERO_ADDRESS,
                "tokenId": self.token_id,
                "makerAmount": self.maker_amount.to_string(),
                "takerAmount": self.taker_amount.to_string(),
                "expiration": "0",
                "nonce": self.nonce.to_string(),
                "feeRateBps": "0",
                "side": "BUY",
                "signatureType": self.signature_type,
                "signature": self.signature
            },
            "owner": owner,
            "orderType": "FOK"
        })
    }
}

fn field(name: &str, ty: &str) -> Eip712DomainType {
    Eip712DomainType {
        name: name.to_string(),
        r#type: ty.to_string(),
    }
}

fn order_typed_data(
    order: &MarketBuy,
    maker: Address,
    maker_amount: U256,
    taker_amount: U256,
    chain_id: u64,
) -> Result<TypedData> {
    let token_id = U256::from_dec_str(&order.token_id)
        .with_context(|| format!("Invalid token_id '{}' for order signing", order.token_id))?;

    let domain = EIP712Domain {
        name: Some(POLYMARKET_CTF_EXCHANGE_DOMAIN.to_string()),
        version: Some(DOMAIN_VERSION.to_string()),
        chain_id: Some(chain_id.into()),
        verifying_contract: Some(ctf_exchange_address(chain_id)?),
        salt: None,
    };

    let mut types: Types = BTreeMap::new();
    types.insert(
        "Order".to_string(),
        vec![
            field("salt", "uint256"),
            field("maker", "address"),
            field("signer", "address"),
            field("taker", "address"),
            field("tokenId", "uint256"),
            field("makerAmount", "uint256"),
            field("takerAmount", "uint256"),
            field("expiration", "uint256"),
            field("nonce", "uint256"),
            field("feeRateBps", "uint256"),
            field("side", "uint8"),
            field("signatureType", "uint8"),
        ],
    );

    let maker_hex = format!("{:#x}", maker);
    let mut message = BTreeMap::<String, Value>::new();
    message.insert("salt".into(), Value::String(order.salt.to_string()));
    message.insert("maker".into(), Value::String(maker_hex.clone()));
    message.insert("signer".into(), Value::String(maker_hex));
    message.insert("taker".into(), Value::String(ZERO_ADDRESS.to_string()));
    message.insert("tokenId".into(), Value::String(token_id.to_string()));
    message.insert("makerAmount".into(), Value::String(maker_amount.to_string()));
    message.insert("takerAmount".into(), Value::String(taker_amount.to_string()));
    message.insert("expiration".into(), Value::String("0".into()));
    message.insert("nonce".into(), Value::String(order.nonce.to_string()));
    message.insert("feeRateBps".into(), Value::String("0".into()));
    // BUY
    message.insert("side".into(), Value::from(0_u8));
    message.insert("signatureType".into(), Value::from(order.signature_type));

    Ok(TypedData {
        domain,
        types,
        primary_type: "Order".to_string(),
        message,
    })
}

fn hex_signature(sig: ethers::types::Signature) -> String {
    format!("0x{}", hex::encode(sig.to_vec()))
}

/// Sign a market BUY using EIP-712
pub async fn sign_market_buy(
    order: &MarketBuy,
    wallet: &LocalWallet,
    chain_id: u64,
) -> Result<SignedOrder> {
    let (maker_amount, taker_amount) = order.amounts()?;
    let maker = wallet.address();
    let typed = order_typed_data(order, maker, maker_amount, taker_amount, chain_id)?;
    let signature = wallet
        .sign_typed_data(&typed)
        .await
        .context("Failed to sign order typed data")?;

    Ok(SignedOrder {
        salt: order.salt,
        maker,
        token_id: order.token_id.clone(),
        maker_amount,
        taker_amount,
        nonce: order.nonce,
        signature_type: order.signature_type,
        signature: hex_signature(signature),
    })
}

/// Create L1 signature for `/auth/*` endpoints.
pub async fn create_l1_signature(
    wallet: &LocalWallet,
    chain_id: u64,
    timestamp: i64,
    nonce: u64,
) -> Result<String> {
    let domain = EIP712Domain {
        name: Some(CLOB_AUTH_DOMAIN.to_string()),
        version: Some(DOMAIN_VERSION.to_string()),
        chain_id: Some(chain_id.into()),
        verifying_contract: None,
        salt: None,
    };

    let mut types: Types = BTreeMap::new();
    types.insert(
        "ClobAuth".to_string(),
        vec![
            field("address", "address"),
            field("timestamp", "string"),
            field("nonce", "uint256"),
            field("message", "string"),
        ],
    );

    let mut message = BTreeMap::<String, Value>::new();
    message.insert(
        "address".into(),
        Value::String(format!("{:#x}", wallet.address())),
    );
    message.insert("timestamp".into(), Value::String(timestamp.to_string()));
    message.insert("nonce".into(), Value::String(nonce.to_string()));
    message.insert("message".into(), Value::String(CLOB_AUTH_MESSAGE.to_string()));

    let typed = TypedData {
        domain,
        types,
        primary_type: "ClobAuth".to_string(),
        message,
    };
    let sig = wallet
        .sign_typed_data(&typed)
        .await
        .context("Failed to sign L1 auth typed data")?;
    Ok(hex_signature(sig))
}

/// Create L2 HMAC signature for authenticated CLOB REST requests.
pub fn create_l2_signature(
    api_secret: &str,
    timestamp: i64,
    method: &str,
    request_path: &str,
    body: Option<&str>,
) -> Result<String> {
    let secret_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(api_secret)
        .or_else(|_| general_purpose::URL_SAFE.decode(api_secret))
        .context("Failed decoding api secret as url-safe base64")?;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(&secret_bytes).context("Failed to initialize HMAC")?;
    let payload = format!(
        "{}{}{}{}",
        timestamp,
        method.to_uppercase(),
        request_path,
        body.unwrap_or("")
    );
    mac.update(payload.as_bytes());
    Ok(general_purpose::URL_SAFE.encode(mac.finalize().into_bytes()))
}
