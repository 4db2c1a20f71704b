//! Deep copy for the Kustomization API family.
//!
//! Every field is an owned value (`String`, `Vec`, `BTreeMap`, `Option<T>`), so `Clone` already
//! allocates fresh backing storage for each container and keeps `None` as `None`. The traits
//! below expose that as the copy contract the operator relies on.

use std::{any::Any, fmt::Debug};

use kube::{core::GroupVersionKind, Resource as _};

use super::{
    kustomization::{Kustomization, KustomizationList, KustomizationSpec, KustomizationStatus},
    types::{
        ConfigMapArgs, FieldSelector, FieldSpec, GeneratorArgs, GeneratorOptions, Gvk, Image,
        KvPairSources, Patch, PatchJson6902, PatchTarget, Replica, SecretArgs, Selector, Target,
        TransformerConfig, Var,
    },
};

pub trait DeepCopy: Clone + Default {
    /// `self` を `out` に書き込む
    fn deep_copy_into(&self, out: &mut Self) {
        out.clone_from(self);
    }

    fn deep_copy(&self) -> Self {
        let mut out = Self::default();
        self.deep_copy_into(&mut out);
        out
    }

    /// `None` はそのまま `None` を返す
    fn deep_copy_option(src: Option<&Self>) -> Option<Self> {
        src.map(Self::deep_copy)
    }
}

/// 型を消したまま複製できるオブジェクト
pub trait RuntimeObject: Any + Debug + Send + Sync {
    fn group_version_kind(&self) -> GroupVersionKind;

    fn deep_copy_object(&self) -> Box<dyn RuntimeObject>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn RuntimeObject {
    pub fn downcast_ref<T: RuntimeObject>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl Clone for Box<dyn RuntimeObject> {
    fn clone(&self) -> Self {
        self.deep_copy_object()
    }
}

macro_rules! impl_deep_copy {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl DeepCopy for $ty {}
        )+
    };
}

macro_rules! impl_runtime_object {
    ($ty:ty, $kind:expr) => {
        impl RuntimeObject for $ty {
            fn group_version_kind(&self) -> GroupVersionKind {
                GroupVersionKind::gvk(
                    &Kustomization::group(&()),
                    &Kustomization::version(&()),
                    &$kind,
                )
            }

            fn deep_copy_object(&self) -> Box<dyn RuntimeObject> {
                Box::new(self.deep_copy())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

impl_deep_copy!(
    Kustomization,
    KustomizationList,
    KustomizationSpec,
    KustomizationStatus,
    Gvk,
    GeneratorOptions,
    KvPairSources,
    GeneratorArgs,
    ConfigMapArgs,
    SecretArgs,
    Image,
    Selector,
    Patch,
    PatchTarget,
    PatchJson6902,
    Replica,
    Target,
    FieldSelector,
    Var,
    FieldSpec,
    TransformerConfig,
);

impl_runtime_object!(Kustomization, Kustomization::kind(&()));
impl_runtime_object!(KustomizationList, format!("{}List", Kustomization::kind(&())));
